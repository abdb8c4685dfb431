//! External model runtime: the capability the `ml` method delegates to.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub mod bridge;
pub mod wire;

pub use bridge::BridgeRuntime;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to start model bridge: {0}")]
    Spawn(String),

    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge protocol error: {0}")]
    Protocol(String),

    #[error("bridge reported an error: {0}")]
    Remote(String),

    #[error("bridge did not answer within {0:?}")]
    Timeout(Duration),

    #[error("bridge is closed")]
    Closed,
}

/// Opaque model host. Implementations must be callable from several tasks.
#[async_trait::async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn load_model(&self, path: &Path, model_id: &str) -> Result<(), RuntimeError>;

    /// Runs one input vector through the model and returns its output vector.
    async fn predict(&self, model_id: &str, input: &[f64]) -> Result<Vec<f64>, RuntimeError>;

    async fn unload_model(&self, model_id: &str) -> Result<(), RuntimeError>;

    /// False once the runtime has exited or failed irrecoverably.
    fn is_healthy(&self) -> bool;

    /// Stops the runtime, waiting at most `grace` for in-flight calls.
    async fn close(&self, grace: Duration) -> Result<(), RuntimeError>;
}
