// Engine behaviour: bookkeeping, convergence, failure handling, single-flight

use std::sync::atomic::Ordering;

use statesync::sync::{
    hash_bytes, AttemptResult, ConflictPolicy, SyncAction, SyncEvent, SyncOutcome,
};

use crate::support::Harness;

const ALL: [ConflictPolicy; 3] = [
    ConflictPolicy::PreferLocal,
    ConflictPolicy::PreferServer,
    ConflictPolicy::PreferNewer,
];

#[tokio::test]
async fn test_repeated_sync_is_noop_and_keeps_fingerprint() {
    let h = Harness::agreed_on(ConflictPolicy::PreferNewer, b"v1").await;
    let agreed = h.state().await.last_synced_fingerprint;
    assert!(agreed.is_some());

    for _ in 0..2 {
        let report = h.sync().await;
        assert_eq!(report.action, Some(SyncAction::NoOp));
        assert_eq!(report.bytes_transferred, 0);
        assert_eq!(h.state().await.last_synced_fingerprint, agreed);
    }
    assert_eq!(h.remote.pushes.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_local_change_converges_by_push() {
    let h = Harness::agreed_on(ConflictPolicy::PreferServer, b"v1").await;
    h.write_local(b"v2 edited locally");

    let report = h.sync().await;
    assert_eq!(report.action, Some(SyncAction::Push));
    assert_eq!(h.remote.content().unwrap(), b"v2 edited locally");

    let state = h.state().await;
    assert_eq!(
        state.last_synced_fingerprint.unwrap().content_hash,
        hash_bytes(b"v2 edited locally")
    );
}

#[tokio::test]
async fn test_remote_change_converges_by_pull_and_notifies_reload() {
    let h = Harness::agreed_on(ConflictPolicy::PreferLocal, b"v1").await;
    h.remote.set(b"v2 from another machine", None);
    let mut events = h.engine.subscribe();

    let report = h.sync().await;
    assert_eq!(report.action, Some(SyncAction::Pull));
    assert_eq!(h.read_local(), b"v2 from another machine");

    let mut reloaded = None;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Reloaded { fingerprint } = event {
            reloaded = Some(fingerprint);
        }
    }
    let reloaded = reloaded.expect("no reload notification after pull");
    assert_eq!(reloaded.content_hash, hash_bytes(b"v2 from another machine"));
    assert_eq!(h.state().await.last_synced_fingerprint, Some(reloaded));

    assert_eq!(h.sync().await.action, Some(SyncAction::NoOp));
}

#[tokio::test]
async fn test_missing_remote_pushes_under_every_policy() {
    for policy in ALL {
        let h = Harness::agreed_on(policy, b"v1").await;
        h.write_local(b"v2");
        h.remote.clear();

        let report = h.sync().await;
        assert_eq!(report.action, Some(SyncAction::Push), "policy {policy:?}");
        assert_eq!(h.remote.content().unwrap(), b"v2");
    }
}

#[tokio::test]
async fn test_failed_pull_leaves_local_file_intact() {
    let h = Harness::agreed_on(ConflictPolicy::PreferNewer, b"original").await;
    let before = h.state().await.last_synced_fingerprint;
    h.remote.set(b"newer remote content", None);
    h.remote.fail_pull.store(true, Ordering::SeqCst);

    let report = h.sync().await;
    assert_eq!(report.result, AttemptResult::TransportError);
    assert!(report.error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(h.read_local(), b"original");

    let leftovers: Vec<_> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".sync-"))
        .collect();
    assert!(leftovers.is_empty());

    let state = h.state().await;
    assert_eq!(state.last_result, Some(AttemptResult::TransportError));
    assert_eq!(state.last_synced_fingerprint, before);
    assert!(state.last_error_message.unwrap().starts_with("network error"));
}

#[tokio::test]
async fn test_failed_push_is_recorded_and_retried() {
    let h = Harness::agreed_on(ConflictPolicy::PreferNewer, b"v1").await;
    h.write_local(b"v2");
    h.remote.reject_push.store(true, Ordering::SeqCst);

    let report = h.sync().await;
    assert_eq!(report.result, AttemptResult::TransportError);
    let state = h.state().await;
    assert_eq!(
        state.last_synced_fingerprint.unwrap().content_hash,
        hash_bytes(b"v1")
    );
    assert!(state.last_error_message.unwrap().starts_with("auth error"));

    h.remote.reject_push.store(false, Ordering::SeqCst);
    let report = h.sync().await;
    assert_eq!(report.action, Some(SyncAction::Push));
    let state = h.state().await;
    assert_eq!(state.last_result, Some(AttemptResult::Success));
    assert_eq!(state.last_error_message, None);
}

#[tokio::test]
async fn test_second_trigger_while_running_does_nothing() {
    let h = Harness::new(ConflictPolicy::PreferNewer);
    h.write_local(b"v1");
    h.remote.block();

    let engine = h.engine.clone();
    let config = h.config.clone();
    let first = tokio::spawn(async move { engine.sync(&config).await });

    h.remote.wait_entered().await;
    assert!(h.engine.is_running());

    let second = h.engine.sync(&h.config).await;
    assert!(matches!(second, SyncOutcome::AlreadyRunning));
    assert_eq!(h.remote.stats.load(Ordering::SeqCst), 1);

    h.remote.release();
    let first = first.await.unwrap();
    assert_eq!(first.report().unwrap().action, Some(SyncAction::Push));
    assert_eq!(h.remote.stats.load(Ordering::SeqCst), 1);
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_remote_without_hash_is_downloaded_once() {
    let h = Harness::new(ConflictPolicy::PreferNewer);
    h.remote.hide_hash.store(true, Ordering::SeqCst);
    h.remote.set(b"server copy", None);

    let report = h.sync().await;
    assert_eq!(report.action, Some(SyncAction::Pull));
    assert_eq!(h.read_local(), b"server copy");
    assert_eq!(h.remote.pulls.load(Ordering::SeqCst), 1);

    // Equal content still costs a download to prove it
    assert_eq!(h.sync().await.action, Some(SyncAction::NoOp));
    assert_eq!(h.remote.pulls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_nothing_on_either_side_is_skipped() {
    let h = Harness::new(ConflictPolicy::PreferNewer);

    let report = h.sync().await;
    assert_eq!(report.result, AttemptResult::Skipped);
    assert_eq!(h.remote.pushes.load(Ordering::SeqCst), 0);

    let state = h.state().await;
    assert_eq!(state.last_result, Some(AttemptResult::Skipped));
    assert!(state.last_attempt_at.is_some());
    assert!(state.last_synced_fingerprint.is_none());
}

#[tokio::test]
async fn test_corrupt_bookkeeping_starts_fresh() {
    let h = Harness::agreed_on(ConflictPolicy::PreferLocal, b"v1").await;
    let record = h.store().record_path(&h.config.transport.remote_id());
    std::fs::write(&record, b"{ not json").unwrap();

    // No agreed fingerprint any more, so identical content is still a no-op
    let report = h.sync().await;
    assert_eq!(report.action, Some(SyncAction::NoOp));
    assert!(h.state().await.last_result.is_some());
}

#[tokio::test]
async fn test_unreadable_local_file_is_local_io_error() {
    let h = Harness::new(ConflictPolicy::PreferNewer);
    std::fs::create_dir(h.local_path()).unwrap();

    let report = h.sync().await;
    assert_eq!(report.result, AttemptResult::LocalIoError);
    assert_eq!(h.remote.stats.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_finished_event_carries_report() {
    let h = Harness::new(ConflictPolicy::PreferNewer);
    h.write_local(b"v1");
    let mut events = h.engine.subscribe();

    let report = h.sync().await;
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(SyncEvent::Started { .. })));
    match seen.last() {
        Some(SyncEvent::Finished(finished)) => {
            assert_eq!(finished.action, report.action);
            assert_eq!(finished.bytes_transferred, 2);
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}
