// HTTP transport against the real server and against wiremock

use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use statesync::config::{SyncConfig, TransportConfig};
use statesync::fs::{
    DefaultConnector, HttpTransport, LocalStateFile, Transport, TransportErrorKind,
};
use statesync::server::{BlobStore, SyncServer, CONTENT_HASH_HEADER};
use statesync::sync::{hash_bytes, AttemptResult, StateStore, SyncAction, SyncEngine};

const TOKEN: &str = "s3cret";

struct TestServer {
    endpoint: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
    _dir: TempDir,
}

impl TestServer {
    async fn start(max_blob_bytes: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("blob.db")).await.unwrap();
        let server = SyncServer::new(TOKEN, store, max_blob_bytes);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));

        Self {
            endpoint: format!("http://{addr}/db"),
            shutdown: Some(tx),
            task: Some(task),
            _dir: dir,
        }
    }

    fn transport(&self, token: &str) -> HttpTransport {
        HttpTransport::new(&self.endpoint, token, 5).unwrap()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.unwrap().unwrap();
        }
    }
}

fn http_config(endpoint: &str) -> SyncConfig {
    SyncConfig::new(TransportConfig::Http {
        endpoint: endpoint.to_string(),
        token: TOKEN.to_string(),
        timeout_seconds: 5,
    })
}

fn engine(dir: &TempDir) -> SyncEngine {
    SyncEngine::new(
        LocalStateFile::new(dir.path().join("state.db")),
        StateStore::new(dir.path().join("sync-state")),
        Arc::new(DefaultConnector),
    )
}

#[tokio::test]
async fn test_two_machines_converge_through_server() {
    let server = TestServer::start(1024 * 1024).await;
    let config = http_config(&server.endpoint);

    let laptop_dir = TempDir::new().unwrap();
    let desktop_dir = TempDir::new().unwrap();
    let laptop = engine(&laptop_dir);
    let desktop = engine(&desktop_dir);

    std::fs::write(laptop_dir.path().join("state.db"), b"tasks from laptop").unwrap();
    let report = laptop.sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.action, Some(SyncAction::Push));

    // Fresh install pulls what is on the server
    let report = desktop.sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.action, Some(SyncAction::Pull));
    assert_eq!(
        std::fs::read(desktop_dir.path().join("state.db")).unwrap(),
        b"tasks from laptop"
    );

    std::fs::write(desktop_dir.path().join("state.db"), b"edited on desktop").unwrap();
    let report = desktop.sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.action, Some(SyncAction::Push));

    let report = laptop.sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.action, Some(SyncAction::Pull));
    assert_eq!(
        std::fs::read(laptop_dir.path().join("state.db")).unwrap(),
        b"edited on desktop"
    );

    let report = laptop.sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.action, Some(SyncAction::NoOp));

    server.stop().await;
}

#[tokio::test]
async fn test_empty_server_and_token_errors_are_distinct() {
    let server = TestServer::start(1024).await;

    let good = server.transport(TOKEN);
    assert!(good.stat().await.unwrap().is_none());
    let missing = good.pull().await.unwrap_err();
    assert_eq!(missing.kind, TransportErrorKind::NotFound);

    let bad = server.transport("wrong");
    assert_eq!(bad.stat().await.unwrap_err().kind, TransportErrorKind::Auth);
    assert_eq!(
        bad.push(b"data".to_vec()).await.unwrap_err().kind,
        TransportErrorKind::Auth
    );

    server.stop().await;
}

#[tokio::test]
async fn test_push_then_stat_and_pull() {
    let server = TestServer::start(1024).await;
    let transport = server.transport(TOKEN);

    transport.push(b"payload".to_vec()).await.unwrap();

    let meta = transport.stat().await.unwrap().unwrap();
    assert_eq!(meta.size_bytes, 7);
    assert_eq!(meta.content_hash.as_deref(), Some(hash_bytes(b"payload").as_str()));
    assert!(meta.modified_at.is_some());

    let blob = transport.pull().await.unwrap();
    assert_eq!(blob.data, b"payload");
    assert!(blob.modified_at.is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_push_is_rejected() {
    let server = TestServer::start(16).await;
    let transport = server.transport(TOKEN);

    let err = transport.push(vec![7u8; 4096]).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Protocol);
    assert!(err.message.contains("413"));
    assert!(transport.stat().await.unwrap().is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_server_rejects_malformed_requests() {
    let server = TestServer::start(1024).await;
    let client = reqwest::Client::new();

    let response = client
        .get(&server.endpoint)
        .header("authorization", "Basic czNjcmV0")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client.get(&server.endpoint).send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .put(&server.endpoint)
        .bearer_auth(TOKEN)
        .header(CONTENT_HASH_HEADER, hash_bytes(b"something else"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(&server.endpoint)
        .bearer_auth(TOKEN)
        .body("posted")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(&server.endpoint)
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("last-modified"));
    assert_eq!(
        response.headers()[CONTENT_HASH_HEADER].to_str().unwrap(),
        hash_bytes(b"posted")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"posted");

    server.stop().await;
}

async fn mock_transport(mock: &MockServer) -> HttpTransport {
    HttpTransport::new(&format!("{}/db", mock.uri()), TOKEN, 5).unwrap()
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let cases = [
        (500, TransportErrorKind::Network),
        (503, TransportErrorKind::Network),
        (403, TransportErrorKind::Auth),
        (401, TransportErrorKind::Auth),
        (400, TransportErrorKind::Protocol),
        (418, TransportErrorKind::Protocol),
    ];

    for (status, kind) in cases {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/db/meta"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock)
            .await;

        let err = mock_transport(&mock).await.stat().await.unwrap_err();
        assert_eq!(err.kind, kind, "status {status}");
    }
}

#[tokio::test]
async fn test_client_sends_token_and_content_hash() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/db"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(header(CONTENT_HASH_HEADER, hash_bytes(b"blob").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock)
        .await;

    mock_transport(&mock).await.push(b"blob".to_vec()).await.unwrap();
}

#[tokio::test]
async fn test_garbage_metadata_is_protocol_error() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
        .mount(&mock)
        .await;

    let err = mock_transport(&mock).await.stat().await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Protocol);
}

#[tokio::test]
async fn test_corrupt_download_is_rejected_and_local_kept() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/db/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "size_bytes": 6,
            "content_hash": hash_bytes(b"remote"),
            "modified_at": "2030-01-01T00:00:00Z",
        })))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/db"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(CONTENT_HASH_HEADER, hash_bytes(b"remote").as_str())
                .set_body_bytes(b"remot".to_vec()),
        )
        .mount(&mock)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("state.db"), b"local").unwrap();
    let mut config = http_config(&format!("{}/db", mock.uri()));
    config.conflict_policy = statesync::sync::ConflictPolicy::PreferServer;

    let report = engine(&dir).sync(&config).await.report().cloned().unwrap();
    assert_eq!(report.result, AttemptResult::TransportError);
    assert!(report.error.unwrap().contains("corrupt"));
    assert_eq!(std::fs::read(dir.path().join("state.db")).unwrap(), b"local");
}
