use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sync::hash::hash_bytes;

/// Metadata of the stored blob, as served by `GET {endpoint}/meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub size_bytes: u64,
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
}

impl BlobMeta {
    fn describe(data: &[u8], modified_at: DateTime<Utc>) -> Self {
        Self {
            size_bytes: data.len() as u64,
            content_hash: hash_bytes(data),
            modified_at,
        }
    }
}

/// Single-tenant, single-blob store on disk. No history: a put overwrites.
pub struct BlobStore {
    path: PathBuf,
    /// Guards the file together with its cached metadata.
    meta: RwLock<Option<BlobMeta>>,
}

impl BlobStore {
    /// Open the store, picking up a blob left by a previous run.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = match tokio::fs::read(&path).await {
            Ok(data) => {
                let modified = tokio::fs::metadata(&path)
                    .await?
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Some(BlobMeta::describe(&data, modified))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read blob {}", path.display()));
            }
        };

        Ok(Self {
            path,
            meta: RwLock::new(meta),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn meta(&self) -> Option<BlobMeta> {
        self.meta.read().await.clone()
    }

    /// Current blob with its metadata, `None` before the first put.
    pub async fn get(&self) -> io::Result<Option<(Vec<u8>, BlobMeta)>> {
        let guard = self.meta.read().await;
        let Some(meta) = guard.clone() else {
            return Ok(None);
        };
        let data = tokio::fs::read(&self.path).await?;
        Ok(Some((data, meta)))
    }

    /// Replace the blob (temp file + rename). Last writer wins.
    pub async fn put(&self, data: &[u8]) -> io::Result<BlobMeta> {
        let mut guard = self.meta.write().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self
            .path
            .with_extension(format!("upload-{}", Uuid::new_v4().simple()));
        if let Err(err) = write_then_rename(&temp, &self.path, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err);
        }

        let meta = BlobMeta::describe(data, Utc::now());
        *guard = Some(meta.clone());
        Ok(meta)
    }
}

async fn write_then_rename(temp: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(temp, path).await
}
