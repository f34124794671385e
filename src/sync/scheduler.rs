//! Background timer driving periodic sync attempts.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::sync::engine::{SyncEngine, SyncOutcome};

/// Periodic driver for one engine.
///
/// Ticks no more often than `interval_seconds`; a tick that lands while an
/// attempt is still running is dropped rather than queued.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config_tx: watch::Sender<SyncConfig>,
    kick: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the timer task. Must be called inside a tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>, config: SyncConfig) -> Self {
        let (config_tx, config_rx) = watch::channel(config);
        let kick = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_timer(
            engine.clone(),
            config_rx,
            kick.clone(),
            cancel.clone(),
        ));

        Self {
            engine,
            config_tx,
            kick,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Current config snapshot.
    pub fn config(&self) -> SyncConfig {
        self.config_tx.borrow().clone()
    }

    /// Swap in a new config. The timer restarts with the new interval, or
    /// stops if sync was disabled; an attempt already running keeps its snapshot.
    pub fn update_config(&self, config: SyncConfig) {
        self.config_tx.send_replace(config);
    }

    /// Sync now, outside the timer. Still single-flight.
    pub async fn trigger(&self) -> SyncOutcome {
        let config = self.config();
        let outcome = self.engine.sync(&config).await;
        if matches!(outcome, SyncOutcome::AlreadyRunning) {
            info!("manual sync ignored, an attempt is already running");
        }
        outcome
    }

    /// Queue an attempt on the timer task without waiting for it.
    ///
    /// Unlike [`trigger`](Self::trigger), the attempt belongs to the timer
    /// task, so [`shutdown`](Self::shutdown) drains it. Ignored while sync
    /// is disabled; repeated requests before the attempt starts collapse.
    pub fn request_sync(&self) {
        self.kick.notify_one();
    }

    /// Stop the timer and wait up to `timeout` for any in-flight attempt.
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let task = self.task.lock().await.take();

        let drained = async {
            if let Some(task) = task {
                if let Err(err) = task.await {
                    warn!("sync timer task ended abnormally: {err}");
                }
            }
            self.engine.wait_idle().await;
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => {
                debug!("scheduler stopped");
                true
            }
            Err(_) => {
                warn!(?timeout, "sync attempt still running at shutdown deadline");
                false
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_timer(
    engine: Arc<SyncEngine>,
    mut config_rx: watch::Receiver<SyncConfig>,
    kick: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let config = config_rx.borrow_and_update().clone();

        if !config.enabled {
            debug!("sync disabled, timer idle");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                _ = kick.notified() => {
                    debug!("requested sync ignored, sync disabled");
                    continue;
                }
            }
        }

        let period = config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(?period, "sync timer armed");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!("sync config changed, re-arming timer");
                    break;
                }
                _ = kick.notified() => {
                    let snapshot = config_rx.borrow().clone();
                    if let SyncOutcome::AlreadyRunning = engine.sync(&snapshot).await {
                        debug!("requested sync skipped, attempt already running");
                    }
                }
                _ = ticker.tick() => {
                    let snapshot = config_rx.borrow().clone();
                    if let SyncOutcome::AlreadyRunning = engine.sync(&snapshot).await {
                        debug!("tick skipped, attempt already running");
                    }
                }
            }
        }
    }
}
