use async_trait::async_trait;
use opendal::{services::Ftp, Operator};

use crate::fs::backend::{RemoteBlob, RemoteMeta, Transport, TransportKind};
use crate::fs::error::TransportError;
use crate::fs::object::ObjectTransport;

/// FTP / FTPS transport using OpenDAL.
///
/// OpenDAL's FTP writer STORs every upload to a temporary name and renames
/// it over the target when the write closes, so a dropped connection never
/// leaves a half-written blob in place. The service exposes no `rename` of
/// its own; uploads must go through a plain write. Modification
/// times come from MLSD/MDTM where the server supports them; otherwise they
/// are absent and `prefer_newer` falls back to the local copy.
///
/// Credentials travel in plaintext unless `secure` is set or the link is
/// tunnelled.
pub struct FtpTransport {
    inner: ObjectTransport,
}

impl FtpTransport {
    pub fn new(
        host: &str,
        port: u16,
        path: &str,
        username: &str,
        password: &str,
        secure: bool,
    ) -> Result<Self, TransportError> {
        if host.is_empty() {
            return Err(TransportError::protocol("FTP host must be set"));
        }

        let (dir, file) = split_path(path)
            .ok_or_else(|| TransportError::protocol(format!("invalid FTP path: {path:?}")))?;

        let scheme = if secure { "ftps" } else { "ftp" };
        let builder = Ftp::default()
            .endpoint(&format!("{scheme}://{host}:{port}"))
            .root(&dir)
            .user(username)
            .password(password);

        let operator = Operator::new(builder)?.finish();
        let display = format!("{scheme}://{host}:{port}{}{file}", dir);

        Ok(Self {
            inner: ObjectTransport::new(operator, &file, TransportKind::Ftp, display),
        })
    }
}

/// Split `/dir/sub/file.db` into (`/dir/sub/`, `file.db`)
fn split_path(path: &str) -> Option<(String, String)> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let (dir, file) = path.rsplit_once('/')?;
    if file.is_empty() {
        return None;
    }
    Some((format!("{dir}/"), file.to_string()))
}

#[async_trait]
impl Transport for FtpTransport {
    async fn stat(&self) -> Result<Option<RemoteMeta>, TransportError> {
        self.inner.stat().await
    }

    async fn pull(&self) -> Result<RemoteBlob, TransportError> {
        self.inner.pull().await
    }

    async fn push(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.inner.push(data).await
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    fn display_target(&self) -> String {
        self.inner.display_target()
    }
}
