//! Persisted session state.
//!
//! A [`Snapshot`] is a versioned JSON document holding the configuration,
//! every window and every estimator state. Saving the same state twice
//! yields the same bytes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::HealthAggregator;
use crate::stream::{Channel, MultiStream, VectorChannel};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub config: EngineConfig,
    pub scalar: Option<Channel>,
    pub vector: Option<VectorChannel>,
    pub streams: MultiStream,
    pub health: HealthAggregator,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::StateFault(format!("failed to encode state: {e}")))
    }

    /// Decodes and checks a snapshot. Any problem is a `StateFault`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::StateFault(format!("undecodable state: {e}")))?;
        if snapshot.version != STATE_VERSION {
            return Err(EngineError::StateFault(format!(
                "unsupported state version {} (expected {STATE_VERSION})",
                snapshot.version
            )));
        }
        snapshot
            .config
            .validate()
            .map_err(|e| EngineError::StateFault(format!("persisted config rejected: {e}")))?;
        Ok(snapshot)
    }
}

/// Snapshot storage on disk, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored bytes; `None` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "state file read");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read state file {}", self.path.display())),
        }
    }

    /// Writes to a sibling temp file, syncs it, then renames it over the
    /// target so readers never observe a partial file.
    pub fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        }
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("failed to write {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync {}", tmp.display()))?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move state into place at {}", self.path.display()))?;
        info!(path = %self.path.display(), bytes = bytes.len(), "state saved");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Snapshot {
        Snapshot {
            version: STATE_VERSION,
            config: EngineConfig::default(),
            scalar: None,
            vector: None,
            streams: MultiStream::default(),
            health: HealthAggregator::default(),
        }
    }

    #[test]
    fn test_version_is_checked() {
        let mut s = empty();
        s.version = 99;
        let bytes = serde_json::to_vec(&s).unwrap();
        assert!(matches!(Snapshot::from_bytes(&bytes), Err(EngineError::StateFault(_))));
        assert!(matches!(Snapshot::from_bytes(b"not json"), Err(EngineError::StateFault(_))));
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("state.json"));
        assert!(file.load().unwrap().is_none());

        let bytes = empty().to_bytes().unwrap();
        file.save(&bytes).unwrap();
        file.save(&bytes).unwrap();
        assert_eq!(file.load().unwrap().unwrap(), bytes);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
        assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), empty());
    }
}
