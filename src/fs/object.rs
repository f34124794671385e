use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::raw::Timestamp;
use opendal::{services::Memory, Capability, ErrorKind, Operator};

use crate::fs::backend::{RemoteBlob, RemoteMeta, Transport, TransportKind};
use crate::fs::error::TransportError;

/// Single-object transport on top of an OpenDAL operator.
///
/// FTP and S3 share this and differ only in how the operator is built.
/// Upload atomicity is the service's business: S3 PUTs are atomic and
/// OpenDAL's FTP writer stores to a temporary name before renaming.
pub struct ObjectTransport {
    operator: Operator,
    path: String,
    kind: TransportKind,
    display: String,
}

impl ObjectTransport {
    pub fn new(operator: Operator, path: &str, kind: TransportKind, display: String) -> Self {
        Self {
            operator,
            path: path.trim_start_matches('/').to_string(),
            kind,
            display,
        }
    }

    /// In-process object store for local tooling and tests
    pub fn memory(path: &str) -> Result<Self, TransportError> {
        let operator = Operator::new(Memory::default())?.finish();
        Ok(Self::new(
            operator,
            path,
            TransportKind::Memory,
            format!("memory://{}", path.trim_start_matches('/')),
        ))
    }

    /// Object path relative to the operator root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// What the underlying service supports
    pub fn capability(&self) -> Capability {
        self.operator.info().full_capability()
    }
}

#[async_trait]
impl Transport for ObjectTransport {
    async fn stat(&self) -> Result<Option<RemoteMeta>, TransportError> {
        let meta = match self.operator.stat(&self.path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if meta.mode().is_dir() {
            return Err(TransportError::protocol(format!(
                "{} is a directory",
                self.display
            )));
        }

        Ok(Some(RemoteMeta {
            size_bytes: meta.content_length(),
            content_hash: None,
            modified_at: meta.last_modified().and_then(to_chrono),
        }))
    }

    async fn pull(&self) -> Result<RemoteBlob, TransportError> {
        let meta = self
            .stat()
            .await?
            .ok_or_else(|| TransportError::not_found(format!("{} does not exist", self.display)))?;

        let content = self.operator.read(&self.path).await?;

        Ok(RemoteBlob {
            data: content.to_vec(),
            modified_at: meta.modified_at,
        })
    }

    async fn push(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.capability().write {
            return Err(TransportError::protocol(format!(
                "{} does not accept uploads",
                self.display
            )));
        }

        self.operator.write(&self.path, data).await?;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn display_target(&self) -> String {
        self.display.clone()
    }
}

fn to_chrono(ts: Timestamp) -> Option<DateTime<Utc>> {
    let ts = ts.into_inner();
    DateTime::from_timestamp(ts.as_second(), ts.subsec_nanosecond().try_into().ok()?)
}
