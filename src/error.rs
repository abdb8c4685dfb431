use thiserror::Error;

use crate::runtime::RuntimeError;

/// Failures surfaced by the engine.
///
/// Estimators below their warm-up count are not errors; they produce a
/// `warmup` output instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("numeric fault: {0}")]
    NumericFault(String),

    #[error("corrupt persisted state: {0}")]
    StateFault(String),

    #[error("external model runtime failed: {0}")]
    External(#[from] RuntimeError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
