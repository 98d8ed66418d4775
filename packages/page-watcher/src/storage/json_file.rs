//! Durable single-record state file.
//!
//! Writes go to a sibling `*.tmp` file which is fsynced and then renamed
//! over the real path, so a crash leaves either the old record or the new
//! one, never a torn file at the real path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::StateStore;
use crate::types::{WatchState, STATE_FORMAT_VERSION};

pub struct JsonFileStore {
    path: PathBuf,
    /// Reject records written for another URL
    expected_target: Option<String>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            expected_target: None,
        }
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.expected_target = Some(target.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn validate(&self, state: WatchState) -> StorageResult<WatchState> {
        if state.version != STATE_FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(state.version));
        }
        if !state.last_signature.is_consistent() {
            return Err(StorageError::HashMismatch {
                path: self.path.clone(),
            });
        }
        if let Some(expected) = &self.expected_target {
            if &state.target != expected {
                return Err(StorageError::TargetMismatch {
                    expected: expected.clone(),
                    found: state.target,
                });
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> StorageResult<Option<WatchState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet");
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let state: WatchState =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        self.validate(state).map(Some)
    }

    async fn save(&self, state: &WatchState) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(StorageError::Serialize)?;
        let temp = self.temp_path();

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            warn!(path = %self.path.display(), error = %e, "State rename failed");
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::Io(e));
        }

        #[cfg(unix)]
        {
            // Persist the rename itself
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::File::open(parent).await?.sync_all().await?;
            }
        }

        debug!(
            path = %self.path.display(),
            hash = %state.last_signature.hash.short(),
            "State saved"
        );
        Ok(())
    }
}
