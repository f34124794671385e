use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::sync::hash::Fingerprint;

/// Consistent copy of the local state file taken under a shared lock
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    pub data: Vec<u8>,
    pub fingerprint: Fingerprint,
}

/// The application's local state file, treated as an opaque blob.
///
/// Locks are advisory: they coordinate with the interactive application,
/// which takes the same kind of locks on the same path.
#[derive(Debug, Clone)]
pub struct LocalStateFile {
    path: PathBuf,
}

impl LocalStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file under a shared lock. `Ok(None)` when it does not exist yet.
    pub async fn snapshot(&self) -> io::Result<Option<LocalSnapshot>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_snapshot(&path))
            .await
            .map_err(io::Error::other)?
    }

    /// Replace the file with `data` via temp file + rename and return the new fingerprint.
    ///
    /// The old file stays fully readable until the rename lands; on any error
    /// it is left untouched.
    pub async fn replace(&self, data: Vec<u8>) -> io::Result<Fingerprint> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_atomically(&path, &data))
            .await
            .map_err(io::Error::other)?
    }
}

fn read_snapshot(path: &Path) -> io::Result<Option<LocalSnapshot>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    file.lock_shared()?;
    let result = read_locked(&mut file);
    file.unlock()?;

    let (data, modified_at) = result?;
    let fingerprint = Fingerprint::compute(&data, Some(modified_at));
    Ok(Some(LocalSnapshot { data, fingerprint }))
}

fn read_locked(file: &mut File) -> io::Result<(Vec<u8>, DateTime<Utc>)> {
    let modified_at = modified_time(file)?;
    let mut data = Vec::with_capacity(file.metadata()?.len() as usize);
    file.read_to_end(&mut data)?;
    Ok((data, modified_at))
}

fn modified_time(file: &File) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(file.metadata()?.modified()?))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.sync-{}", name, Uuid::new_v4().simple()))
}

fn replace_atomically(path: &Path, data: &[u8]) -> io::Result<Fingerprint> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path_for(path);
    let result = write_and_swap(path, &temp, data);
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_and_swap(path: &Path, temp: &Path, data: &[u8]) -> io::Result<Fingerprint> {
    let mut staged = OpenOptions::new().write(true).create_new(true).open(temp)?;
    staged.write_all(data)?;
    staged.sync_all()?;
    drop(staged);

    // Exclusive lock only around the rename itself
    let current = match File::open(path) {
        Ok(file) => Some(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };
    if let Some(file) = &current {
        file.lock()?;
    }
    let renamed = fs::rename(temp, path);
    if let Some(file) = &current {
        let _ = file.unlock();
    }
    renamed?;

    let modified_at = modified_time(&File::open(path)?)?;
    Ok(Fingerprint::compute(data, Some(modified_at)))
}
