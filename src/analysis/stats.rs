//! Descriptive statistics, quantiles, regression and smoothing over window views.

use serde::{Deserialize, Serialize};

/// Slope magnitude below which a series is considered flat.
pub const TREND_EPSILON: f64 = 0.01;

/// Holt smoothing constants.
pub const HOLT_ALPHA: f64 = 0.3;
pub const HOLT_BETA: f64 = 0.1;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq_diff: f64 = values.iter().map(|&x| (x - m).powi(2)).sum();
    sum_sq_diff / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Coefficient of variation `σ / |μ|`; zero when the mean is zero.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(values) / m.abs()
}

/// Returns an ascending copy of `values`. NaNs sort last.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// First and third quartile of an ascending slice plus their spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quartiles {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

/// Sorted-index quartiles: `q1 = s[⌊n/4⌋]`, `q3 = s[⌊3n/4⌋]`.
pub fn quartiles(sorted: &[f64]) -> Option<Quartiles> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let q1 = sorted[((n as f64 * 0.25).floor() as usize).min(n - 1)];
    let q3 = sorted[((n as f64 * 0.75).floor() as usize).min(n - 1)];
    Some(Quartiles { q1, q3, iqr: q3 - q1 })
}

/// Linearly interpolated percentile of an ascending slice, `p` in `[0, 100]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let idx = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = idx.floor() as usize;
            let hi = idx.ceil() as usize;
            let frac = idx - lo as f64;
            sorted[lo] * (1.0 - frac) + sorted[hi] * frac
        }
    }
}

/// Direction of a fitted series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub fn from_slope(slope: f64) -> Self {
        if slope > TREND_EPSILON {
            Trend::Increasing
        } else if slope < -TREND_EPSILON {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }
}

/// Ordinary least squares fit of `y` against the sample index `0, 1, 2, …`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination, 0 when `y` has no variance.
    pub r_squared: f64,
    /// Residual standard error with `n - 2` degrees of freedom.
    pub std_error: f64,
}

impl Regression {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    pub fn trend(&self) -> Trend {
        Trend::from_slope(self.slope)
    }
}

pub fn linear_regression(y: &[f64]) -> Regression {
    let n = y.len() as f64;
    if y.is_empty() {
        return Regression {
            slope: 0.0,
            intercept: 0.0,
            r_squared: 0.0,
            std_error: 0.0,
        };
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &v) in y.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += v;
        sum_xy += x * v;
        sum_xx += x * x;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    let slope = if denom == 0.0 {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denom
    };
    let intercept = (sum_y - slope * sum_x) / n;

    let y_mean = sum_y / n;
    let mut ss_tot = 0.0;
    let mut ss_res = 0.0;
    for (i, &v) in y.iter().enumerate() {
        let fitted = intercept + slope * i as f64;
        ss_res += (v - fitted).powi(2);
        ss_tot += (v - y_mean).powi(2);
    }

    let r_squared = if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let std_error = if y.len() > 2 {
        (ss_res / (n - 2.0)).sqrt()
    } else {
        0.0
    };

    Regression {
        slope,
        intercept,
        r_squared,
        std_error,
    }
}

/// Final level and trend of Holt's double-exponential smoothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoltState {
    pub level: f64,
    pub trend: f64,
}

impl HoltState {
    /// Forecast `h` steps past the last observation.
    pub fn forecast(&self, h: usize) -> f64 {
        self.level + h as f64 * self.trend
    }
}

/// Runs Holt smoothing over the series. The level starts at `y₀` and the
/// trend at `y₁ − y₀`.
pub fn holt(values: &[f64], alpha: f64, beta: f64) -> Option<HoltState> {
    match values.len() {
        0 => None,
        1 => Some(HoltState {
            level: values[0],
            trend: 0.0,
        }),
        _ => {
            let mut level = values[0];
            let mut trend = values[1] - values[0];
            for &y in &values[1..] {
                let prev_level = level;
                level = alpha * y + (1.0 - alpha) * (prev_level + trend);
                trend = beta * (level - prev_level) + (1.0 - beta) * trend;
            }
            Some(HoltState { level, trend })
        }
    }
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function via the Lanczos approximation, with the reflection
/// formula below 0.5.
pub fn gamma(z: f64) -> f64 {
    if z < 0.5 {
        return std::f64::consts::PI / ((std::f64::consts::PI * z).sin() * gamma(1.0 - z));
    }
    let z = z - 1.0;
    let mut x = LANCZOS_COEFFS[0];
    for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        x += c / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(z + 0.5) * (-t).exp() * x
}

/// Mean gap between consecutive timestamps in milliseconds; 0 with fewer than two.
pub fn mean_interval(timestamps: &[i64]) -> f64 {
    if timestamps.len() < 2 {
        return 0.0;
    }
    let span = (timestamps[timestamps.len() - 1] - timestamps[0]) as f64;
    span / (timestamps.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_population_variance() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mean(&v), 3.0);
        assert_eq!(variance(&v), 2.0);
        assert!((std_dev(&v) - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_quartiles_use_sorted_index_rule() {
        let s = sorted(&[8.0, 1.0, 4.0, 2.0, 7.0, 3.0, 6.0, 5.0]);
        let q = quartiles(&s).unwrap();
        // n = 8 -> indices 2 and 6
        assert_eq!(q.q1, 3.0);
        assert_eq!(q.q3, 7.0);
        assert_eq!(q.iqr, 4.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let s = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&s, 0.0), 10.0);
        assert_eq!(percentile(&s, 100.0), 50.0);
        assert_eq!(percentile(&s, 50.0), 30.0);
        // i = 0.1 * 4 = 0.4
        assert!((percentile(&s, 10.0) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_regression_exact_line() {
        let y: Vec<f64> = (0..10).map(|i| 2.0 + 0.5 * i as f64).collect();
        let r = linear_regression(&y);
        assert!((r.slope - 0.5).abs() < 1e-12);
        assert!((r.intercept - 2.0).abs() < 1e-12);
        assert!((r.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(r.trend(), Trend::Increasing);
    }

    #[test]
    fn test_regression_single_point_has_zero_slope() {
        let r = linear_regression(&[4.0]);
        assert_eq!(r.slope, 0.0);
        assert_eq!(r.intercept, 4.0);
    }

    #[test]
    fn test_trend_labels() {
        assert_eq!(Trend::from_slope(0.02), Trend::Increasing);
        assert_eq!(Trend::from_slope(-0.02), Trend::Decreasing);
        assert_eq!(Trend::from_slope(0.005), Trend::Stable);
    }

    #[test]
    fn test_holt_tracks_linear_series() {
        let y: Vec<f64> = (0..30).map(|i| 3.0 * i as f64).collect();
        let h = holt(&y, HOLT_ALPHA, HOLT_BETA).unwrap();
        assert!((h.trend - 3.0).abs() < 1e-9);
        assert!((h.forecast(1) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_gamma_known_values() {
        assert!((gamma(1.0) - 1.0).abs() < 1e-10);
        assert!((gamma(5.0) - 24.0).abs() < 1e-8);
        assert!((gamma(0.5) - std::f64::consts::PI.sqrt()).abs() < 1e-10);
        // reflection branch
        assert!((gamma(0.25) - 3.625_609_908_221_908).abs() < 1e-9);
    }

    #[test]
    fn test_mean_interval() {
        assert_eq!(mean_interval(&[0, 1000, 2000, 3000]), 1000.0);
        assert_eq!(mean_interval(&[5]), 0.0);
    }
}
