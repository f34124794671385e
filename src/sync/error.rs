//! Error types for a sync attempt.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::fs::TransportError;
use crate::sync::state::AttemptResult;

/// Errors that end a sync attempt. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local state file could not be read or replaced.
    #[error("local state file {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Remote operation failed; the next scheduled tick retries.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Divergence that no configured policy can settle.
    #[error("conflict needs manual resolution: {0}")]
    ConflictUnresolvable(String),
}

impl SyncError {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Outcome recorded in the sync state for this error.
    pub fn result(&self) -> AttemptResult {
        match self {
            Self::LocalIo { .. } => AttemptResult::LocalIoError,
            Self::Transport(_) => AttemptResult::TransportError,
            Self::ConflictUnresolvable(_) => AttemptResult::Conflict,
        }
    }
}
