//! Debounce of raw verdicts into stable alarm flags.
//!
//! Entering the alarm state takes `consecutive_count` raw anomalies in a row;
//! leaving it takes `⌈consecutive_count · (1 + hysteresis_percent/100)⌉`
//! raw normals. While an alarm is held against normal input the verdict is
//! reported as a warning.

use serde::{Deserialize, Serialize};

use crate::config::HysteresisConfig;

use super::{Severity, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hysteresis {
    pub last_anomaly: bool,
    pub consec_anom: u32,
    pub consec_norm: u32,
}

/// Debounce bookkeeping reported with each output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HysteresisInfo {
    pub enabled: bool,
    /// True when the final flag differs from the raw one.
    pub applied: bool,
    pub consecutive_anomalies: u32,
    pub consecutive_normals: u32,
}

/// Normals needed to leave the alarm state.
pub fn release_count(cfg: &HysteresisConfig) -> u32 {
    let n = f64::from(cfg.consecutive_count) * (1.0 + cfg.hysteresis_percent.max(0.0) / 100.0);
    (n.ceil() as u32).max(cfg.consecutive_count)
}

impl Hysteresis {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn count(&mut self, raw_anomaly: bool) {
        if raw_anomaly {
            self.consec_anom += 1;
            self.consec_norm = 0;
        } else {
            self.consec_norm += 1;
            self.consec_anom = 0;
        }
    }

    fn info(&self, cfg: &HysteresisConfig, applied: bool) -> HysteresisInfo {
        HysteresisInfo {
            enabled: cfg.enabled,
            applied,
            consecutive_anomalies: self.consec_anom,
            consecutive_normals: self.consec_norm,
        }
    }

    /// Feeds one raw verdict and returns the final one.
    pub fn apply(&mut self, raw: Verdict, cfg: &HysteresisConfig) -> (Verdict, HysteresisInfo) {
        let raw_anomaly = raw.is_anomaly;
        self.count(raw_anomaly);

        if !cfg.enabled {
            self.last_anomaly = raw_anomaly;
            return (raw, self.info(cfg, false));
        }

        if !self.last_anomaly {
            if raw_anomaly && self.consec_anom < cfg.consecutive_count {
                let text = format!(
                    "pending anomaly ({}/{}): {}",
                    self.consec_anom, cfg.consecutive_count, raw.status_text
                );
                let held = raw.with_severity(Severity::Normal, text);
                return (held, self.info(cfg, true));
            }
            self.last_anomaly = raw_anomaly;
            return (raw, self.info(cfg, false));
        }

        if raw_anomaly {
            return (raw, self.info(cfg, false));
        }

        let release = release_count(cfg);
        if self.consec_norm >= release {
            self.last_anomaly = false;
            return (raw, self.info(cfg, false));
        }

        let text = format!(
            "alarm held ({}/{} normals): {}",
            self.consec_norm, release, raw.status_text
        );
        let held = raw.with_severity(Severity::Warning, text);
        (held, self.info(cfg, true))
    }
}
