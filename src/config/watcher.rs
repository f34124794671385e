//! Settings file watcher.
//!
//! Watches the directory holding the settings file (editors usually replace
//! files by rename) and reports changes to that one file.

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Async watcher for a single settings file.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<()>,
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    /// Start watching `path`. The file's directory must exist.
    pub fn new(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .context("Config path has no file name")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if is_relevant(&event, &file_name) {
                        let _ = tx.send(());
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            path: path.to_path_buf(),
            debounce: Duration::from_millis(250),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next change, folding a burst of events into one.
    ///
    /// Returns `None` once the underlying watcher is gone.
    pub async fn changed(&mut self) -> Option<()> {
        self.receiver.recv().await?;
        tokio::time::sleep(self.debounce).await;
        while self.receiver.try_recv().is_ok() {}
        Some(())
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let touches_data = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    touches_data
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
