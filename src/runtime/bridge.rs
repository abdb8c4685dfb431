//! Model runtime hosted in a child process speaking line-delimited JSON.
//!
//! Requests carry a fresh UUID; a background task reads responses and hands
//! each one to the caller waiting on that id, so several calls can be in
//! flight at once.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::wire::{self, BridgeCodec, BridgeRequest, BridgeResponse, Command, READY_ID};
use super::{ModelRuntime, RuntimeError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeResponse>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BridgeRuntime {
    writer: tokio::sync::Mutex<FramedWrite<BoxedWriter, BridgeCodec>>,
    pending: Pending,
    healthy: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl BridgeRuntime {
    /// Starts `command` (program followed by its arguments) and waits for
    /// the bridge's ready message.
    pub async fn spawn(command: &[String], timeout: Duration) -> Result<Self, RuntimeError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RuntimeError::Spawn("empty bridge command".into()))?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Spawn("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Spawn("bridge stdout unavailable".into()))?;

        info!(%program, pid = ?child.id(), "starting model bridge");
        let runtime = Self::from_io(Box::new(stdout), Box::new(stdin), timeout).await?;
        *runtime.child.lock().await = Some(child);
        Ok(runtime)
    }

    /// Speaks the bridge protocol over an arbitrary byte stream pair.
    pub async fn from_io(
        reader: BoxedReader,
        writer: BoxedWriter,
        timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let mut reader = FramedRead::new(reader, BridgeCodec::new());

        let first = tokio::time::timeout(timeout, reader.next())
            .await
            .map_err(|_| RuntimeError::Timeout(timeout))?;
        match first {
            Some(Ok(msg)) if msg.id == READY_ID && msg.success => {}
            Some(Ok(msg)) => {
                return Err(RuntimeError::Protocol(format!(
                    "expected ready message, got id '{}'",
                    msg.id
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(RuntimeError::Closed),
        }
        info!("model bridge ready");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let healthy = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(read_loop(reader, pending.clone(), healthy.clone()));

        Ok(Self {
            writer: tokio::sync::Mutex::new(FramedWrite::new(writer, BridgeCodec::new())),
            pending,
            healthy,
            child: tokio::sync::Mutex::new(None),
            reader: Mutex::new(Some(handle)),
            timeout,
        })
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.request(Command::Ping).await.map(|_| ())
    }

    /// Loaded models and available packages, as reported by the bridge.
    pub async fn status(&self) -> Result<Value, RuntimeError> {
        self.request(Command::Status).await
    }

    async fn request(&self, command: Command) -> Result<Value, RuntimeError> {
        if !self.is_healthy() {
            return Err(RuntimeError::Closed);
        }
        let id = Uuid::new_v4().to_string();
        let name = command.name();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            writer
                .send(BridgeRequest {
                    id: id.clone(),
                    command,
                })
                .await
        };
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            self.healthy.store(false, Ordering::SeqCst);
            warn!(error = %e, command = name, "failed to write to model bridge");
            return Err(e);
        }
        debug!(%id, command = name, "bridge request sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp.into_result(),
            // The reader dropped our sender: the bridge went away.
            Ok(Err(_)) => Err(RuntimeError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(RuntimeError::Timeout(self.timeout))
            }
        }
    }
}

async fn read_loop(
    mut reader: FramedRead<BoxedReader, BridgeCodec>,
    pending: Pending,
    healthy: Arc<AtomicBool>,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(msg) => {
                let waiter = lock(&pending).remove(&msg.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => debug!(id = %msg.id, "unsolicited bridge message"),
                }
            }
            Err(e) => {
                warn!(error = %e, "model bridge stream failed");
                break;
            }
        }
    }
    healthy.store(false, Ordering::SeqCst);
    lock(&pending).clear();
    info!("model bridge stream closed");
}

#[async_trait::async_trait]
impl ModelRuntime for BridgeRuntime {
    async fn load_model(&self, path: &Path, model_id: &str) -> Result<(), RuntimeError> {
        let result = self
            .request(Command::LoadModel {
                model_path: path.to_string_lossy().into_owned(),
                model_id: model_id.to_string(),
            })
            .await?;
        info!(model_id, path = %path.display(), ?result, "model loaded");
        Ok(())
    }

    async fn predict(&self, model_id: &str, input: &[f64]) -> Result<Vec<f64>, RuntimeError> {
        let result = self
            .request(Command::Predict {
                model_id: model_id.to_string(),
                input_data: vec![input.to_vec()],
            })
            .await?;
        wire::first_row(&result)
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), RuntimeError> {
        self.request(Command::UnloadModel {
            model_id: model_id.to_string(),
        })
        .await?;
        info!(model_id, "model unloaded");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&self, grace: Duration) -> Result<(), RuntimeError> {
        if self.is_healthy() {
            match tokio::time::timeout(grace, self.request(Command::Shutdown)).await {
                Ok(Ok(_)) => debug!("bridge acknowledged shutdown"),
                Ok(Err(e)) => warn!(error = %e, "bridge shutdown request failed"),
                Err(_) => warn!(?grace, "bridge did not acknowledge shutdown in time"),
            }
        }
        self.healthy.store(false, Ordering::SeqCst);

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => info!(%status, "model bridge exited"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("model bridge still running after grace period; killing");
                    child.kill().await?;
                }
            }
        }
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
        lock(&self.pending).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{split, DuplexStream, ReadHalf, WriteHalf};
    use tokio_util::codec::LinesCodec;

    /// In-process stand-in for the bridge: answers each request line with
    /// `answer(request)`.
    fn fake_bridge(
        server: DuplexStream,
        answer: impl Fn(&Value) -> Value + Send + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (r, w): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = split(server);
            let mut lines = FramedRead::new(r, LinesCodec::new());
            let mut out = FramedWrite::new(w, LinesCodec::new());
            out.send(r#"{"id":"ready","success":true}"#.to_string()).await.unwrap();
            while let Some(Ok(line)) = lines.next().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let reply = answer(&req);
                out.send(reply.to_string()).await.unwrap();
                if req["command"] == "shutdown" {
                    break;
                }
            }
        })
    }

    async fn connect(answer: impl Fn(&Value) -> Value + Send + 'static) -> BridgeRuntime {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _bridge = fake_bridge(server, answer);
        let (r, w) = split(client);
        BridgeRuntime::from_io(Box::new(r), Box::new(w), Duration::from_secs(2))
            .await
            .expect("handshake failed")
    }

    fn ok(req: &Value, result: Value) -> Value {
        serde_json::json!({"id": req["id"], "success": true, "result": result})
    }

    #[tokio::test]
    async fn test_predict_uses_first_row() {
        let rt = connect(|req| match req["command"].as_str() {
            Some("predict") => {
                let row = &req["input_data"][0];
                let doubled: Vec<f64> = row
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|v| v.as_f64().unwrap() * 2.0)
                    .collect();
                ok(req, serde_json::json!([doubled]))
            }
            _ => ok(req, serde_json::json!({"message": "ok"})),
        })
        .await;

        rt.load_model(Path::new("/models/m.pkl"), "m").await.unwrap();
        let out = rt.predict("m", &[1.0, 2.5]).await.unwrap();
        assert_eq!(out, vec![2.0, 5.0]);
        rt.ping().await.unwrap();
        assert!(rt.is_healthy());
    }

    #[tokio::test]
    async fn test_remote_error_is_reported() {
        let rt = connect(|req| {
            serde_json::json!({"id": req["id"], "success": false, "error": "Model x not loaded"})
        })
        .await;
        let err = rt.predict("x", &[1.0]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Remote(_)));
        assert!(rt.is_healthy());
    }

    #[tokio::test]
    async fn test_close_marks_unhealthy() {
        let rt = connect(|req| ok(req, serde_json::json!({"message": "bye"}))).await;
        rt.close(Duration::from_millis(500)).await.unwrap();
        assert!(!rt.is_healthy());
        assert!(matches!(rt.predict("m", &[1.0]).await, Err(RuntimeError::Closed)));
    }

    #[tokio::test]
    async fn test_handshake_requires_ready() {
        let (client, server) = tokio::io::duplex(1024);
        let _bridge = tokio::spawn(async move {
            let (_r, w) = split(server);
            let mut out = FramedWrite::new(w, LinesCodec::new());
            out.send(r#"{"id":"other","success":true}"#.to_string()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        let (r, w) = split(client);
        let err = BridgeRuntime::from_io(Box::new(r), Box::new(w), Duration::from_secs(1))
            .await
            .err()
            .expect("handshake should fail");
        assert!(matches!(err, RuntimeError::Protocol(_)));
    }
}
