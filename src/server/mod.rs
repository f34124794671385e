//! Minimal authenticated blob store for the HTTP transport.
//!
//! Routes (all require `Authorization: Bearer <token>`):
//!
//! - `GET  /db`      current blob, with `Last-Modified` and `X-Content-Blake3`
//! - `GET  /db/meta` JSON [`BlobMeta`]
//! - `PUT|POST /db`  replace the blob; optional `X-Content-Blake3` is verified
//!
//! Missing or wrong token is `401`, no blob yet is `404`, a malformed
//! `Authorization` or hash header (or a hash mismatch) is `400`.

mod store;

pub use store::{BlobMeta, BlobStore};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::sync::hash::hash_bytes;

/// Header carrying the BLAKE3 hex digest of a blob
pub const CONTENT_HASH_HEADER: &str = "x-content-blake3";

/// Path the blob is served under
pub const BLOB_ROUTE: &str = "/db";

/// Rejection with a status and a short plain-text reason.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid or missing token")
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "no blob stored yet")
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(err: std::io::Error) -> Self {
        warn!("blob store I/O failed: {err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage failure")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

struct ServerState {
    /// Digest of the configured token; `blake3::Hash` compares in constant time.
    token_digest: blake3::Hash,
    store: BlobStore,
}

impl ServerState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Err(ApiError::unauthorized());
        };
        let value = value
            .to_str()
            .map_err(|_| ApiError::bad_request("authorization header is not valid text"))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::bad_request("authorization must use the Bearer scheme"))?;

        if blake3::hash(token.trim().as_bytes()) == self.token_digest {
            Ok(())
        } else {
            Err(ApiError::unauthorized())
        }
    }
}

/// Read the optional client-supplied content hash
fn expected_hash(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(CONTENT_HASH_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::bad_request("content hash header is not valid text"))?
        .trim()
        .to_ascii_lowercase();

    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::bad_request("content hash must be 64 hex characters"));
    }
    Ok(Some(value))
}

async fn get_blob(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.authorize(&headers)?;

    let (data, meta) = state
        .store
        .get()
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(ApiError::not_found)?;

    let last_modified = meta
        .modified_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();

    let mut response = data.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.content_hash) {
        response_headers.insert(CONTENT_HASH_HEADER, value);
    }
    Ok(response)
}

async fn get_meta(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<Json<BlobMeta>, ApiError> {
    state.authorize(&headers)?;
    state.store.meta().await.map(Json).ok_or_else(ApiError::not_found)
}

async fn put_blob(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BlobMeta>, ApiError> {
    state.authorize(&headers)?;

    if let Some(expected) = expected_hash(&headers)? {
        let actual = hash_bytes(&body);
        if actual != expected {
            return Err(ApiError::bad_request(format!(
                "content hash mismatch: header says {expected}, body is {actual}"
            )));
        }
    }

    let meta = state.store.put(&body).await.map_err(ApiError::internal)?;
    info!(bytes = meta.size_bytes, hash = %&meta.content_hash[..12], "blob replaced");
    Ok(Json(meta))
}

/// HTTP sync server holding exactly one blob.
pub struct SyncServer {
    state: Arc<ServerState>,
    max_blob_bytes: usize,
}

impl SyncServer {
    pub fn new(token: &str, store: BlobStore, max_blob_bytes: usize) -> Self {
        Self {
            state: Arc::new(ServerState {
                token_digest: blake3::hash(token.trim().as_bytes()),
                store,
            }),
            max_blob_bytes,
        }
    }

    /// Build a server from settings, opening the blob store on disk.
    pub async fn open(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = BlobStore::open(&config.blob_path).await?;
        Ok(Self::new(&config.token, store, config.max_blob_bytes))
    }

    /// Build the HTTP router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(BLOB_ROUTE, get(get_blob).put(put_blob).post(put_blob))
            .route(&format!("{BLOB_ROUTE}/meta"), get(get_meta))
            .layer(DefaultBodyLimit::max(self.max_blob_bytes))
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("sync server listening on http://{addr}{BLOB_ROUTE}");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("sync server failed")
    }
}
