//! Transport error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad class of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorKind {
    /// Credentials rejected by the remote.
    Auth,
    /// Connection, DNS, TLS or timeout failure.
    Network,
    /// The remote blob does not exist.
    NotFound,
    /// The remote answered, but not in a way we understand.
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auth => "auth",
            Self::Network => "network",
            Self::NotFound => "notfound",
            Self::Protocol => "protocol",
        })
    }
}

/// Failure of a single transport operation.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == TransportErrorKind::NotFound
    }
}

impl From<opendal::Error> for TransportError {
    fn from(err: opendal::Error) -> Self {
        use opendal::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::NotFound => TransportErrorKind::NotFound,
            ErrorKind::PermissionDenied => TransportErrorKind::Auth,
            ErrorKind::ConfigInvalid | ErrorKind::Unsupported => TransportErrorKind::Protocol,
            _ if err.is_temporary() => TransportErrorKind::Network,
            ErrorKind::RateLimited => TransportErrorKind::Network,
            _ => TransportErrorKind::Protocol,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() || err.is_builder() {
            TransportErrorKind::Protocol
        } else {
            TransportErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}
