//! Settings store: the TOML file the sync core reads its snapshots from.

pub mod watcher;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::conflict::ConflictPolicy;

pub use watcher::ConfigWatcher;

const APP_DIR: &str = "statesync";
const REDACTED: &str = "<redacted>";

/// Where and how to reach the remote copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Http {
        /// Full blob URL, e.g. `https://host:8787/db`
        endpoint: String,
        token: String,
        #[serde(default = "default_http_timeout")]
        timeout_seconds: u64,
    },
    Ftp {
        host: String,
        #[serde(default = "default_ftp_port")]
        port: u16,
        /// Remote file path, e.g. `/backup/tasks.db`
        path: String,
        username: String,
        password: String,
        /// Use FTPS instead of plain FTP
        #[serde(default)]
        secure: bool,
    },
    S3 {
        bucket: String,
        key: String,
        #[serde(default = "default_region")]
        region: String,
        /// Custom endpoint for S3-compatible stores; AWS when absent
        #[serde(default)]
        endpoint: Option<String>,
        access_key: String,
        secret_key: String,
    },
}

fn default_http_timeout() -> u64 {
    60
}

fn default_ftp_port() -> u16 {
    21
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl TransportConfig {
    /// Stable identity of the remote, used to key sync bookkeeping
    pub fn remote_id(&self) -> String {
        match self {
            TransportConfig::Http { endpoint, .. } => {
                format!("http:{}", endpoint.trim_end_matches('/'))
            }
            TransportConfig::Ftp {
                host,
                port,
                path,
                username,
                ..
            } => format!("ftp:{}@{}:{}/{}", username, host, port, path.trim_start_matches('/')),
            TransportConfig::S3 {
                bucket,
                key,
                endpoint,
                ..
            } => format!(
                "s3:{}/{}/{}",
                endpoint.as_deref().unwrap_or("aws"),
                bucket,
                key.trim_start_matches('/')
            ),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TransportConfig::Http { .. } => "http",
            TransportConfig::Ftp { .. } => "ftp",
            TransportConfig::S3 { .. } => "s3",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Http {
                endpoint, token, ..
            } => {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    bail!("http endpoint must start with http:// or https://, got {endpoint:?}");
                }
                if token.is_empty() {
                    bail!("http token must not be empty");
                }
            }
            TransportConfig::Ftp { host, path, .. } => {
                if host.is_empty() {
                    bail!("ftp host must not be empty");
                }
                if path.trim_start_matches('/').is_empty() || path.ends_with('/') {
                    bail!("ftp path must name a file, got {path:?}");
                }
            }
            TransportConfig::S3 { bucket, key, .. } => {
                if bucket.is_empty() {
                    bail!("s3 bucket must not be empty");
                }
                if key.trim_start_matches('/').is_empty() {
                    bail!("s3 key must not be empty");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Http {
                endpoint,
                timeout_seconds,
                ..
            } => f
                .debug_struct("Http")
                .field("endpoint", endpoint)
                .field("token", &REDACTED)
                .field("timeout_seconds", timeout_seconds)
                .finish(),
            TransportConfig::Ftp {
                host,
                port,
                path,
                username,
                secure,
                ..
            } => f
                .debug_struct("Ftp")
                .field("host", host)
                .field("port", port)
                .field("path", path)
                .field("username", username)
                .field("password", &REDACTED)
                .field("secure", secure)
                .finish(),
            TransportConfig::S3 {
                bucket,
                key,
                region,
                endpoint,
                access_key,
                ..
            } => f
                .debug_struct("S3")
                .field("bucket", bucket)
                .field("key", key)
                .field("region", region)
                .field("endpoint", endpoint)
                .field("access_key", access_key)
                .field("secret_key", &REDACTED)
                .finish(),
        }
    }
}

/// User-facing sync settings. Each attempt works on its own clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    pub transport: TransportConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    300
}

impl SyncConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            enabled: default_enabled(),
            interval_seconds: default_interval(),
            conflict_policy: ConflictPolicy::default(),
            transport,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            bail!("sync.interval_seconds must be greater than zero");
        }
        self.transport.validate()
    }
}

/// Settings for `statesync serve`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub token: String,
    /// Where the single blob is kept on disk
    pub blob_path: PathBuf,
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: usize,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn default_max_blob_bytes() -> usize {
    64 * 1024 * 1024
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            bail!("server.token must not be empty");
        }
        if self.max_blob_bytes == 0 {
            bail!("server.max_blob_bytes must be greater than zero");
        }
        Ok(())
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("token", &REDACTED)
            .field("blob_path", &self.blob_path)
            .field("max_blob_bytes", &self.max_blob_bytes)
            .finish()
    }
}

/// Whole settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local state file
    pub database: PathBuf,
    /// Directory for sync bookkeeping; platform data dir when absent
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

impl AppConfig {
    /// Default settings path (`<config dir>/statesync/config.toml`)
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("No configuration directory on this platform")?;
        Ok(dir.join(APP_DIR).join("config.toml"))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Validate, then write atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let temp = path.with_extension("toml.tmp");
        std::fs::write(&temp, text)
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        std::fs::rename(&temp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            bail!("database path must not be empty");
        }
        if let Some(sync) = &self.sync {
            sync.validate()?;
        }
        if let Some(server) = &self.server {
            server.validate()?;
        }
        Ok(())
    }

    /// Resolved bookkeeping directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_state_dir(),
        }
    }

    /// Bookkeeping directory used when `state_dir` is not set
    pub fn default_state_dir() -> Result<PathBuf> {
        let dir = dirs::data_dir().context("No data directory on this platform")?;
        Ok(dir.join(APP_DIR).join("state"))
    }
}
