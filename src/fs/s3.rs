use async_trait::async_trait;
use opendal::{services::S3, Operator};

use crate::fs::backend::{RemoteBlob, RemoteMeta, Transport, TransportKind};
use crate::fs::error::TransportError;
use crate::fs::object::ObjectTransport;

/// S3 and S3-compatible object store transport using OpenDAL.
///
/// `stat` is a HEAD, `pull` a GET and `push` a single PUT; the store's own
/// PUT atomicity is what keeps readers from seeing a torn object.
pub struct S3Transport {
    inner: ObjectTransport,
    bucket: String,
    region: String,
}

impl S3Transport {
    /// Create a transport with explicit credentials.
    ///
    /// `endpoint` selects an S3-compatible provider (MinIO, R2, Wasabi, ...);
    /// `None` uses the default AWS endpoint for `region`.
    pub fn new(
        bucket: &str,
        key: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, TransportError> {
        if bucket.is_empty() || key.trim_start_matches('/').is_empty() {
            return Err(TransportError::protocol("S3 bucket and key must be set"));
        }

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)?.finish();
        let display = format!("s3://{}/{}", bucket, key.trim_start_matches('/'));

        Ok(Self {
            inner: ObjectTransport::new(operator, key, TransportKind::S3, display),
            bucket: bucket.to_string(),
            region: region.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl Transport for S3Transport {
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
        TransportKind::S3
    }

    fn display_target(&self) -> String {
        self.inner.display_target()
    }
}
