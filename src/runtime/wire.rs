use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use super::RuntimeError;

/// Maximum line length accepted from the bridge: 16 MB.
const MAX_LINE_LENGTH: usize = 16 * 1_048_576;

/// Id the bridge uses for its unsolicited startup message.
pub const READY_ID: &str = "ready";

/// One request line sent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    LoadModel { model_path: String, model_id: String },
    /// `input_data` is a batch; the engine always sends a single row.
    Predict { model_id: String, input_data: Vec<Vec<f64>> },
    UnloadModel { model_id: String },
    Status,
    Ping,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadModel { .. } => "load_model",
            Command::Predict { .. } => "predict",
            Command::UnloadModel { .. } => "unload_model",
            Command::Status => "status",
            Command::Ping => "ping",
            Command::Shutdown => "shutdown",
        }
    }
}

/// One response line read from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    /// The result on success, the remote error otherwise.
    pub fn into_result(self) -> Result<Value, RuntimeError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(RuntimeError::Remote(
                self.error.unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }
}

/// First output row of a predict result.
///
/// Accepts a batch (`[[...], ...]`), a bare row (`[...]`) or a single number.
pub fn first_row(result: &Value) -> Result<Vec<f64>, RuntimeError> {
    let row = match result {
        Value::Array(items) => match items.first() {
            Some(Value::Array(inner)) => inner.as_slice(),
            Some(_) => items.as_slice(),
            None => return Err(RuntimeError::Protocol("empty predict result".into())),
        },
        Value::Number(n) => {
            return n
                .as_f64()
                .map(|v| vec![v])
                .ok_or_else(|| RuntimeError::Protocol("predict result is not a number".into()));
        }
        other => {
            return Err(RuntimeError::Protocol(format!("unexpected predict result: {other}")));
        }
    };
    row.iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| RuntimeError::Protocol(format!("non-numeric model output: {v}")))
        })
        .collect()
}

/// Newline-delimited JSON codec for the bridge protocol.
pub struct BridgeCodec {
    inner: LinesCodec,
}

impl BridgeCodec {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl From<LinesCodecError> for RuntimeError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                RuntimeError::Protocol("bridge line exceeds maximum length".into())
            }
            LinesCodecError::Io(e) => RuntimeError::Io(e),
        }
    }
}

impl Encoder<BridgeRequest> for BridgeCodec {
    type Error = RuntimeError;

    fn encode(&mut self, item: BridgeRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_string(&item)
            .map_err(|e| RuntimeError::Protocol(format!("failed to serialize request: {e}")))?;
        self.inner.encode(line, dst)?;
        Ok(())
    }
}

impl Decoder for BridgeCodec {
    type Item = BridgeResponse;
    type Error = RuntimeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Model libraries sometimes print to stdout; such lines are skipped.
        while let Some(line) = self.inner.decode(src)? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!(error = %e, line, "ignoring non-protocol line from bridge"),
            }
        }
        Ok(None)
    }
}
