use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::fs::error::TransportError;
use crate::fs::ftp::FtpTransport;
use crate::fs::http::HttpTransport;
use crate::fs::s3::S3Transport;

/// Transport type information for display and identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Ftp,
    S3,
    /// In-process store for local tooling and tests; never built from settings
    Memory,
}

impl TransportKind {
    /// Get a short display name for the transport
    pub fn short_name(&self) -> &'static str {
        match self {
            TransportKind::Http => "HTTP",
            TransportKind::Ftp => "FTP",
            TransportKind::S3 => "S3",
            TransportKind::Memory => "Memory",
        }
    }
}

/// Remote-side metadata, as far as the protocol exposes it without a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub size_bytes: u64,
    /// BLAKE3 hex digest, only when the remote can report one
    pub content_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Full remote payload
#[derive(Debug, Clone)]
pub struct RemoteBlob {
    pub data: Vec<u8>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Uniform access to the single remote copy of the state file.
///
/// Every implementation opens and closes its own session inside each call;
/// nothing survives between sync attempts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch metadata for the remote blob. `Ok(None)` means no blob exists yet.
    async fn stat(&self) -> Result<Option<RemoteMeta>, TransportError>;

    /// Download the whole remote blob
    async fn pull(&self) -> Result<RemoteBlob, TransportError>;

    /// Replace the remote blob. Readers see either the old or the new content.
    async fn push(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Get the transport type
    fn kind(&self) -> TransportKind;

    /// Human-readable location of the remote blob
    fn display_target(&self) -> String;
}

/// Builds a fresh transport for one attempt from a config snapshot.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Connector for the built-in HTTP, FTP and S3 transports
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let transport: Arc<dyn Transport> = match config {
            TransportConfig::Http {
                endpoint,
                token,
                timeout_seconds,
            } => Arc::new(HttpTransport::new(endpoint, token, *timeout_seconds)?),
            TransportConfig::Ftp {
                host,
                port,
                path,
                username,
                password,
                secure,
            } => Arc::new(FtpTransport::new(
                host,
                *port,
                path,
                username,
                password,
                *secure,
            )?),
            TransportConfig::S3 {
                bucket,
                key,
                region,
                endpoint,
                access_key,
                secret_key,
            } => Arc::new(S3Transport::new(
                bucket,
                key,
                region,
                endpoint.as_deref(),
                access_key,
                secret_key,
            )?),
        };
        Ok(transport)
    }
}
