use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::fs::backend::{RemoteBlob, RemoteMeta, Transport, TransportKind};
use crate::fs::error::TransportError;
use crate::server::{BlobMeta, CONTENT_HASH_HEADER};
use crate::sync::hash::hash_bytes;

/// HTTP transport speaking to a [`crate::server::SyncServer`] (or anything
/// implementing the same contract) with a bearer token.
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    meta_url: Url,
    token: String,
}

impl HttpTransport {
    /// `endpoint` is the blob URL itself; metadata lives at `{endpoint}/meta`.
    pub fn new(endpoint: &str, token: &str, timeout_seconds: u64) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| TransportError::protocol(format!("invalid endpoint {endpoint:?}: {e}")))?;
        let meta_url = Url::parse(&format!("{}/meta", endpoint.as_str().trim_end_matches('/')))
            .map_err(|e| TransportError::protocol(format!("invalid metadata url: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            meta_url,
            token: token.to_string(),
        })
    }

    /// Turn a non-success status into a transport error
    async fn check(&self, response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TransportError::auth(format!("{} rejected the token ({detail})", self.endpoint))
            }
            StatusCode::NOT_FOUND => {
                TransportError::not_found(format!("{} has no blob yet", self.endpoint))
            }
            s if s.is_server_error() => {
                TransportError::network(format!("{} failed: {detail}", self.endpoint))
            }
            _ => TransportError::protocol(format!("{} answered {detail}", self.endpoint)),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn stat(&self) -> Result<Option<RemoteMeta>, TransportError> {
        let response = self
            .client
            .get(self.meta_url.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;

        let meta: BlobMeta = match self.check(response).await {
            Ok(response) => response.json().await?,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(Some(RemoteMeta {
            size_bytes: meta.size_bytes,
            content_hash: Some(meta.content_hash),
            modified_at: Some(meta.modified_at),
        }))
    }

    async fn pull(&self) -> Result<RemoteBlob, TransportError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = self.check(response).await?;

        let modified_at = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let expected_hash = response
            .headers()
            .get(CONTENT_HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data = response.bytes().await?.to_vec();

        if let Some(expected) = expected_hash {
            let actual = hash_bytes(&data);
            if actual != expected {
                return Err(TransportError::protocol(format!(
                    "download from {} is corrupt: expected {expected}, got {actual}",
                    self.endpoint
                )));
            }
        }

        debug!(bytes = data.len(), "downloaded blob over HTTP");
        Ok(RemoteBlob { data, modified_at })
    }

    async fn push(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let hash = hash_bytes(&data);
        let response = self
            .client
            .put(self.endpoint.clone())
            .bearer_auth(&self.token)
            .header(CONTENT_HASH_HEADER, hash)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn display_target(&self) -> String {
        self.endpoint.to_string()
    }
}
