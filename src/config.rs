//! Detector configuration.
//!
//! A layered model: compiled-in defaults, an optional TOML file (path from
//! `SENSORWATCH_CONFIG` or the standard system location), then per-sample
//! JSON overrides merged through [`ConfigOverrides`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;

pub const CONFIG_ENV: &str = "SENSORWATCH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/sensorwatch/sensorwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for one detector session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub method: Method,
    pub window_size: usize,

    pub zscore_threshold: f64,
    pub zscore_warning: f64,

    pub iqr_multiplier: f64,

    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    /// Percentage of the bound (or of the min..max range when both are set)
    /// inside which a value is reported as a warning.
    pub warning_margin: f64,

    pub percentile_low: f64,
    pub percentile_high: f64,

    pub ema_alpha: f64,
    /// How EMA and moving-average deviations are scaled.
    pub deviation_mode: DeviationMode,
    pub percent_threshold: f64,
    pub percent_warning: f64,

    /// CUSUM target; the window mean when unset.
    pub cusum_target: Option<f64>,
    pub cusum_drift: f64,
    pub cusum_threshold: f64,
    pub cusum_warning: f64,

    pub hysteresis: HysteresisConfig,
    pub pca: PcaConfig,
    pub trend: TrendConfig,
    pub rul: RulConfig,
    pub health: HealthConfig,
    pub model: ModelConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            method: Method::ZScore,
            window_size: 100,
            zscore_threshold: 3.0,
            zscore_warning: 2.0,
            iqr_multiplier: 1.5,
            min_threshold: None,
            max_threshold: None,
            warning_margin: 10.0,
            percentile_low: 5.0,
            percentile_high: 95.0,
            ema_alpha: 0.3,
            deviation_mode: DeviationMode::StdDev,
            percent_threshold: 20.0,
            percent_warning: 10.0,
            cusum_target: None,
            cusum_drift: 0.5,
            cusum_threshold: 5.0,
            cusum_warning: 3.5,
            hysteresis: HysteresisConfig::default(),
            pca: PcaConfig::default(),
            trend: TrendConfig::default(),
            rul: RulConfig::default(),
            health: HealthConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), method = %config.method, "loaded detector configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `SENSORWATCH_CONFIG` environment variable.
    /// 2. `/etc/sensorwatch/sensorwatch.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SENSORWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Rejects contradictory or out-of-range settings.
    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |msg: String| Err(EngineError::Config(msg));

        if self.window_size == 0 {
            return bad("windowSize must be at least 1".into());
        }
        if self.zscore_warning > self.zscore_threshold {
            return bad(format!(
                "zscoreWarning ({}) must not exceed zscoreThreshold ({})",
                self.zscore_warning, self.zscore_threshold
            ));
        }
        if !(self.iqr_multiplier > 0.0) {
            return bad("iqrMultiplier must be positive".into());
        }
        if let (Some(min), Some(max)) = (self.min_threshold, self.max_threshold) {
            if min >= max {
                return bad(format!("minThreshold ({min}) must be below maxThreshold ({max})"));
            }
        }
        if self.method == Method::Threshold
            && self.min_threshold.is_none()
            && self.max_threshold.is_none()
        {
            return bad("threshold method needs minThreshold or maxThreshold".into());
        }
        if !(0.0..=100.0).contains(&self.percentile_low)
            || !(0.0..=100.0).contains(&self.percentile_high)
            || self.percentile_low >= self.percentile_high
        {
            return bad(format!(
                "percentile bounds {}..{} are not an increasing range within 0..100",
                self.percentile_low, self.percentile_high
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return bad(format!("emaAlpha ({}) must be in (0, 1]", self.ema_alpha));
        }
        if self.percent_warning > self.percent_threshold {
            return bad("percentWarning must not exceed percentThreshold".into());
        }
        if self.cusum_warning > self.cusum_threshold || self.cusum_drift < 0.0 {
            return bad("cusumWarning must not exceed cusumThreshold and drift must be non-negative".into());
        }
        if self.hysteresis.consecutive_count == 0 {
            return bad("consecutiveCount must be at least 1".into());
        }
        if !(self.pca.threshold > 0.0) {
            return bad("pca threshold must be positive".into());
        }
        if !(self.pca.variance_threshold > 0.0 && self.pca.variance_threshold <= 1.0) {
            return bad("pca varianceThreshold must be in (0, 1]".into());
        }
        if self.trend.prediction_steps == 0 {
            return bad("predictionSteps must be at least 1".into());
        }
        if self.health.sensor_weights.values().any(|w| *w < 0.0 || !w.is_finite()) {
            return bad("sensorWeights must be finite and non-negative".into());
        }
        Ok(())
    }

    /// Minimum window length before the configured method produces verdicts.
    pub fn warmup_samples(&self) -> usize {
        match self.method {
            Method::Iqr => 4,
            // A window shorter than ten trains once it is full.
            Method::Pca => (self.window_size / 2).max(10).min(self.window_size),
            _ => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

/// Detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[serde(rename = "zscore")]
    ZScore,
    Iqr,
    Threshold,
    Percentile,
    Ema,
    Cusum,
    MovingAverage,
    Pca,
    /// Delegates to an external model runtime, falling back to Z-score.
    #[serde(rename = "ml")]
    Model,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ZScore => "zscore",
            Method::Iqr => "iqr",
            Method::Threshold => "threshold",
            Method::Percentile => "percentile",
            Method::Ema => "ema",
            Method::Cusum => "cusum",
            Method::MovingAverage => "moving_average",
            Method::Pca => "pca",
            Method::Model => "ml",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "zscore" | "z_score" => Ok(Method::ZScore),
            "iqr" => Ok(Method::Iqr),
            "threshold" => Ok(Method::Threshold),
            "percentile" => Ok(Method::Percentile),
            "ema" => Ok(Method::Ema),
            "cusum" => Ok(Method::Cusum),
            "moving_average" | "movingaverage" | "ma" => Ok(Method::MovingAverage),
            "pca" => Ok(Method::Pca),
            "ml" | "model" => Ok(Method::Model),
            _ => Err(EngineError::Config(format!("unknown method '{s}'"))),
        }
    }
}

/// Scale used by EMA and moving-average deviations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationMode {
    /// Deviation divided by the window standard deviation.
    #[serde(alias = "stddev")]
    StdDev,
    /// Deviation as a percentage of the reference level.
    Percent,
}

// ---------------------------------------------------------------------------
// Hysteresis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub enabled: bool,
    /// Consecutive raw anomalies needed to enter the alarm state.
    pub consecutive_count: u32,
    /// Extra percentage of `consecutive_count` normals needed to leave it.
    pub hysteresis_percent: f64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            consecutive_count: 3,
            hysteresis_percent: 50.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PCA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Sensitivity; thresholds sit at the `1 − 1/(10·threshold)` percentile.
    pub threshold: f64,
    pub auto_components: bool,
    pub n_components: usize,
    pub variance_threshold: f64,
    pub statistic: PcaStatistic,
    pub contribution_threshold: f64,
    pub top_contributors: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            auto_components: true,
            n_components: 2,
            variance_threshold: 0.95,
            statistic: PcaStatistic::Combined,
            contribution_threshold: 0.1,
            top_contributors: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcaStatistic {
    T2,
    Spe,
    Combined,
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub enabled: bool,
    pub method: ForecastMethod,
    /// Number of trailing window values the forecast is fitted on.
    pub lookback: usize,
    pub prediction_steps: usize,
    /// Level for the steps-to-threshold estimate.
    pub threshold: Option<f64>,
    /// Absolute rate of change (units per second) that raises `rocAlert`.
    pub roc_threshold: Option<f64>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: ForecastMethod::Linear,
            lookback: 20,
            prediction_steps: 10,
            threshold: None,
            roc_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Linear,
    Exponential,
}

// ---------------------------------------------------------------------------
// RUL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulConfig {
    pub enabled: bool,
    pub failure_threshold: Option<f64>,
    pub degradation_model: DegradationModel,
    pub unit: RulUnit,
}

impl Default for RulConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: None,
            degradation_model: DegradationModel::Linear,
            unit: RulUnit::Hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationModel {
    Linear,
    Exponential,
    Weibull,
}

impl FromStr for DegradationModel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(DegradationModel::Linear),
            "exponential" => Ok(DegradationModel::Exponential),
            "weibull" => Ok(DegradationModel::Weibull),
            _ => Err(EngineError::Config(format!("unknown degradation model '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulUnit {
    Minutes,
    Hours,
    Days,
    /// Sample intervals.
    Cycles,
}

impl RulUnit {
    /// Converts a duration in milliseconds (or steps, for cycles) to this unit.
    pub fn from_millis(&self, millis: f64, steps: f64) -> f64 {
        match self {
            RulUnit::Minutes => millis / 60_000.0,
            RulUnit::Hours => millis / 3_600_000.0,
            RulUnit::Days => millis / 86_400_000.0,
            RulUnit::Cycles => steps,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub aggregation: Aggregation,
    /// Per-stream weights; missing streams weigh 1.0.
    pub sensor_weights: BTreeMap<String, f64>,
    pub scale: HealthScale,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            aggregation: Aggregation::Weighted,
            sensor_weights: BTreeMap::new(),
            scale: HealthScale::Percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Weighted,
    Dynamic,
    Minimum,
    Average,
    Geometric,
}

impl FromStr for Aggregation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted" => Ok(Aggregation::Weighted),
            "dynamic" => Ok(Aggregation::Dynamic),
            "minimum" | "min" => Ok(Aggregation::Minimum),
            "average" | "mean" => Ok(Aggregation::Average),
            "geometric" => Ok(Aggregation::Geometric),
            _ => Err(EngineError::Config(format!("unknown aggregation method '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthScale {
    #[serde(rename = "0-100")]
    Percent,
    #[serde(rename = "0-1")]
    Unit,
}

impl HealthScale {
    pub fn apply(&self, score: f64) -> f64 {
        match self {
            HealthScale::Percent => score,
            HealthScale::Unit => score / 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// External model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: Option<PathBuf>,
    pub model_id: String,
    pub score_threshold: f64,
    pub timeout_ms: u64,
    /// Command line that starts the bridge process.
    pub bridge_command: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_id: "default".to_string(),
            score_threshold: 0.5,
            timeout_ms: 5_000,
            bridge_command: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Per-sample override map, as carried in a sample's `config` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigOverrides {
    pub method: Option<String>,
    pub window_size: Option<usize>,
    pub zscore_threshold: Option<f64>,
    pub zscore_warning: Option<f64>,
    pub iqr_multiplier: Option<f64>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub hysteresis_enabled: Option<bool>,
    pub consecutive_count: Option<u32>,
    pub aggregation_method: Option<String>,
    pub sensor_weights: Option<BTreeMap<String, f64>>,
    pub failure_threshold: Option<f64>,
    pub degradation_model: Option<String>,
    pub roc_threshold: Option<f64>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `base` with these overrides applied, validated.
    pub fn apply(&self, base: &EngineConfig) -> Result<EngineConfig, EngineError> {
        let mut cfg = base.clone();
        if let Some(m) = &self.method {
            cfg.method = m.parse()?;
        }
        if let Some(v) = self.window_size {
            cfg.window_size = v;
        }
        if let Some(v) = self.zscore_threshold {
            cfg.zscore_threshold = v;
        }
        if let Some(v) = self.zscore_warning {
            cfg.zscore_warning = v;
        }
        if let Some(v) = self.iqr_multiplier {
            cfg.iqr_multiplier = v;
        }
        if let Some(v) = self.min_threshold {
            cfg.min_threshold = Some(v);
        }
        if let Some(v) = self.max_threshold {
            cfg.max_threshold = Some(v);
        }
        if let Some(v) = self.hysteresis_enabled {
            cfg.hysteresis.enabled = v;
        }
        if let Some(v) = self.consecutive_count {
            cfg.hysteresis.consecutive_count = v;
        }
        if let Some(a) = &self.aggregation_method {
            cfg.health.aggregation = a.parse()?;
        }
        if let Some(w) = &self.sensor_weights {
            cfg.health.sensor_weights = w.clone();
        }
        if let Some(v) = self.failure_threshold {
            cfg.rul.failure_threshold = Some(v);
        }
        if let Some(d) = &self.degradation_model {
            cfg.rul.degradation_model = d.parse()?;
        }
        if let Some(v) = self.roc_threshold {
            cfg.trend.roc_threshold = Some(v);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
