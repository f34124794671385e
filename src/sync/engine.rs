//! Sync engine for whole-file replication.
//!
//! One attempt: snapshot the local file, stat the remote, decide, transfer,
//! record the outcome. Attempts for one engine never overlap.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::fs::{Connector, LocalSnapshot, LocalStateFile, RemoteBlob, Transport};
use crate::sync::conflict::{decide, SyncAction};
use crate::sync::error::SyncError;
use crate::sync::hash::Fingerprint;
use crate::sync::state::{AttemptResult, StateStore, SyncState};

const EVENT_CAPACITY: usize = 32;

/// Notification published by the engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An attempt began.
    Started { remote_id: String },
    /// The local file was replaced by a pull; in-memory state must be reloaded.
    Reloaded { fingerprint: Fingerprint },
    /// An attempt reached a terminal state.
    Finished(SyncReport),
}

/// Summary of one finished attempt.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub remote_id: String,
    /// Decided action; `None` when the attempt failed before deciding or was skipped.
    pub action: Option<SyncAction>,
    pub result: AttemptResult,
    pub error: Option<String>,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.result == AttemptResult::Success
    }
}

/// Result of asking the engine to sync.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The attempt ran to a terminal state.
    Completed(SyncReport),
    /// Another attempt was in flight; nothing was done.
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyRunning => None,
        }
    }
}

/// What a successful attempt did.
struct Completed {
    action: Option<SyncAction>,
    result: AttemptResult,
    /// Fingerprint both sides now agree on (push/pull only).
    agreed: Option<Fingerprint>,
    bytes_transferred: u64,
}

impl Completed {
    fn skipped() -> Self {
        Self {
            action: None,
            result: AttemptResult::Skipped,
            agreed: None,
            bytes_transferred: 0,
        }
    }

    fn noop() -> Self {
        Self {
            action: Some(SyncAction::NoOp),
            result: AttemptResult::Success,
            agreed: None,
            bytes_transferred: 0,
        }
    }
}

/// Sync engine for one configured remote.
pub struct SyncEngine {
    local: LocalStateFile,
    store: StateStore,
    connector: Arc<dyn Connector>,
    /// Held for the whole attempt; `try_lock` failure means one is in flight.
    flight: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(local: LocalStateFile, store: StateStore, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local,
            store,
            connector,
            flight: Mutex::new(()),
            events,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn local(&self) -> &LocalStateFile {
        &self.local
    }

    /// Whether an attempt is in flight right now.
    pub fn is_running(&self) -> bool {
        self.flight.try_lock().is_err()
    }

    /// Wait until no attempt is in flight.
    pub async fn wait_idle(&self) {
        let _guard = self.flight.lock().await;
    }

    /// Persisted bookkeeping for the remote described by `config`.
    pub async fn status(&self, config: &SyncConfig) -> Result<SyncState> {
        self.store.load(&config.transport.remote_id()).await
    }

    /// Run one attempt against the remote in `config`.
    ///
    /// Returns immediately with [`SyncOutcome::AlreadyRunning`] if another
    /// attempt holds the engine. Errors never escape: they are recorded in
    /// the sync state and in the returned report.
    pub async fn sync(&self, config: &SyncConfig) -> SyncOutcome {
        let Ok(_guard) = self.flight.try_lock() else {
            debug!("sync already running, ignoring trigger");
            return SyncOutcome::AlreadyRunning;
        };

        let remote_id = config.transport.remote_id();
        let span = info_span!("sync", remote = %remote_id);
        let report = self.run_attempt(config, remote_id).instrument(span).await;
        SyncOutcome::Completed(report)
    }

    async fn run_attempt(&self, config: &SyncConfig, remote_id: String) -> SyncReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let _ = self.events.send(SyncEvent::Started {
            remote_id: remote_id.clone(),
        });

        let mut state = match self.store.load(&remote_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!("Unreadable sync state, starting fresh: {err:#}");
                SyncState::new(remote_id.clone())
            }
        };

        let outcome = self
            .attempt(config, state.last_synced_fingerprint.as_ref())
            .await;

        state.last_attempt_at = Some(started_at);
        let report = match outcome {
            Ok(done) => {
                if let Some(agreed) = done.agreed {
                    state.last_synced_fingerprint = Some(agreed);
                }
                state.last_result = Some(done.result);
                state.last_action = done.action;
                state.last_error_message = None;
                SyncReport {
                    remote_id,
                    action: done.action,
                    result: done.result,
                    error: None,
                    bytes_transferred: done.bytes_transferred,
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Sync failed: {message}");
                state.last_result = Some(err.result());
                state.last_action = None;
                state.last_error_message = Some(message.clone());
                SyncReport {
                    remote_id,
                    action: None,
                    result: err.result(),
                    error: Some(message),
                    bytes_transferred: 0,
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                }
            }
        };

        if let Err(err) = self.store.save(&state).await {
            warn!("Failed to record sync state: {err:#}");
        }

        match report.action {
            Some(action) if report.is_success() => info!(
                %action,
                bytes = report.bytes_transferred,
                ms = report.duration_ms,
                "sync finished"
            ),
            _ => info!(result = %report.result, ms = report.duration_ms, "sync finished"),
        }

        let _ = self.events.send(SyncEvent::Finished(report.clone()));
        report
    }

    async fn attempt(
        &self,
        config: &SyncConfig,
        last_synced: Option<&Fingerprint>,
    ) -> Result<Completed, SyncError> {
        let snapshot = self
            .local
            .snapshot()
            .await
            .map_err(|e| SyncError::local_io(self.local.path(), e))?;

        let transport = self.connector.connect(&config.transport)?;
        let (remote, prefetched) = fingerprint_remote(transport.as_ref()).await?;

        let action = match &snapshot {
            Some(local) => decide(
                &local.fingerprint,
                remote.as_ref(),
                last_synced,
                config.conflict_policy,
            ),
            None if remote.is_some() => SyncAction::Pull,
            None => {
                debug!("neither side has a blob yet");
                return Ok(Completed::skipped());
            }
        };

        debug!(
            %action,
            local = snapshot.as_ref().map(|s| s.fingerprint.short_hash()),
            remote = remote.as_ref().map(|r| r.short_hash()),
            last = last_synced.map(|l| l.short_hash()),
            "decided"
        );

        match action {
            SyncAction::NoOp => Ok(Completed::noop()),
            SyncAction::Push => match snapshot {
                Some(local) => self.push(transport.as_ref(), local).await,
                None => Ok(Completed::skipped()),
            },
            SyncAction::Pull => self.pull(transport.as_ref(), prefetched).await,
            SyncAction::ConflictUnresolvable => Err(SyncError::ConflictUnresolvable(format!(
                "local and {} both changed since the last sync",
                transport.display_target()
            ))),
        }
    }

    async fn push(
        &self,
        transport: &dyn Transport,
        local: LocalSnapshot,
    ) -> Result<Completed, SyncError> {
        let LocalSnapshot { data, fingerprint } = local;
        let bytes = data.len() as u64;

        transport.push(data).await?;
        info!(bytes, to = %transport.display_target(), "pushed local copy");

        Ok(Completed {
            action: Some(SyncAction::Push),
            result: AttemptResult::Success,
            agreed: Some(fingerprint),
            bytes_transferred: bytes,
        })
    }

    async fn pull(
        &self,
        transport: &dyn Transport,
        prefetched: Option<RemoteBlob>,
    ) -> Result<Completed, SyncError> {
        let blob = match prefetched {
            Some(blob) => blob,
            None => transport.pull().await?,
        };
        let bytes = blob.data.len() as u64;

        let fingerprint = self
            .local
            .replace(blob.data)
            .await
            .map_err(|e| SyncError::local_io(self.local.path(), e))?;
        info!(bytes, from = %transport.display_target(), "replaced local copy");

        let _ = self.events.send(SyncEvent::Reloaded {
            fingerprint: fingerprint.clone(),
        });

        Ok(Completed {
            action: Some(SyncAction::Pull),
            result: AttemptResult::Success,
            agreed: Some(fingerprint),
            bytes_transferred: bytes,
        })
    }
}

/// Fingerprint the remote blob, downloading it when `stat` carries no hash.
///
/// The downloaded bytes are handed back so a pull does not fetch twice.
async fn fingerprint_remote(
    transport: &dyn Transport,
) -> Result<(Option<Fingerprint>, Option<RemoteBlob>), SyncError> {
    let Some(meta) = transport.stat().await? else {
        return Ok((None, None));
    };

    if let Some(content_hash) = meta.content_hash {
        let fingerprint = Fingerprint {
            size_bytes: meta.size_bytes,
            content_hash,
            modified_at: meta.modified_at,
        };
        return Ok((Some(fingerprint), None));
    }

    let blob = match transport.pull().await {
        Ok(blob) => blob,
        // Deleted between stat and download
        Err(err) if err.is_not_found() => return Ok((None, None)),
        Err(err) => return Err(err.into()),
    };
    let fingerprint = Fingerprint::compute(&blob.data, blob.modified_at.or(meta.modified_at));
    Ok((Some(fingerprint), Some(blob)))
}
