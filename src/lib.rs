//! SensorWatch -- streaming anomaly detection for industrial sensor telemetry.
//!
//! This crate provides the detection engine: sliding windows, univariate and
//! PCA estimators, hysteresis debounce, trend and remaining-useful-life
//! prediction, health-index aggregation, and the session that ties them
//! together.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod error;
pub mod health;
pub mod output;
pub mod predict;
pub mod runtime;
pub mod sample;
pub mod session;
pub mod simulate;
pub mod state;
pub mod stream;
pub mod window;

pub use config::{ConfigOverrides, EngineConfig, Method};
pub use detect::{Severity, Verdict};
pub use error::{EngineError, Result};
pub use output::{Output, Payload, Sink};
pub use sample::{Reading, Sample};
pub use session::Session;
