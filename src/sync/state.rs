//! Persisted sync bookkeeping, one JSON record per configured remote.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::sync::conflict::SyncAction;
use crate::sync::hash::{hash_bytes, Fingerprint};

/// Outcome of the most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Conflict,
    TransportError,
    LocalIoError,
    Skipped,
}

impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Conflict => "conflict",
            Self::TransportError => "transport error",
            Self::LocalIoError => "local I/O error",
            Self::Skipped => "skipped",
        })
    }
}

/// Bookkeeping for one remote.
///
/// `last_synced_fingerprint` moves only after a successful push or pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub remote_id: String,
    pub last_synced_fingerprint: Option<Fingerprint>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_result: Option<AttemptResult>,
    pub last_action: Option<SyncAction>,
    pub last_error_message: Option<String>,
}

impl SyncState {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            ..Self::default()
        }
    }
}

/// Directory of `SyncState` records keyed by remote id.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `remote_id`
    pub fn record_path(&self, remote_id: &str) -> PathBuf {
        let digest = hash_bytes(remote_id.as_bytes());
        self.dir.join(format!("{}.json", &digest[..16]))
    }

    /// Load the record for `remote_id`, or a fresh one if none exists yet.
    pub async fn load(&self, remote_id: &str) -> Result<SyncState> {
        let path = self.record_path(remote_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SyncState::new(remote_id));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let state: SyncState = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse sync state {}", path.display()))?;
        Ok(state)
    }

    /// Persist the record (temp file + rename).
    pub async fn save(&self, state: &SyncState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.record_path(&state.remote_id);
        let temp = path.with_extension(format!("json.{}", Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&temp, json)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        if let Err(err) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err).with_context(|| format!("Failed to replace {}", path.display()));
        }
        Ok(())
    }

    /// Delete every record. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
