//! Intent marker persistence across process restarts.
//!
//! A "restart" here is a fresh reconciler and marker over the same state
//! directory.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use army_command_integration_tests::{FakeIdentityProvider, Recorder, member, settle};
use army_command_session::{
    FileIntentMarker, GracePolicy, IntentMarker, SessionReconciler, SessionView,
};

fn open_session(
    state_dir: &Path,
) -> (
    FakeIdentityProvider,
    SessionReconciler<FakeIdentityProvider, FileIntentMarker>,
) {
    let provider = FakeIdentityProvider::new();
    let intent = FileIntentMarker::open(state_dir.join("intent.json"));
    let reconciler = SessionReconciler::new(provider.clone(), intent, GracePolicy::default());
    (provider, reconciler)
}

#[tokio::test(start_paused = true)]
async fn test_signed_in_session_waits_for_restore_after_restart() {
    let temp_dir = tempfile::tempdir().unwrap();

    {
        let (provider, reconciler) = open_session(temp_dir.path());
        let _subscription = reconciler.start(|_| {}).unwrap();
        provider.emit(Some(member()));
        settle().await;
    }

    // Restarted: the provider has not restored the session yet
    let (provider, reconciler) = open_session(temp_dir.path());
    let recorder = Recorder::new();
    let _subscription = reconciler.start(recorder.listener()).unwrap();

    provider.emit(None);
    tokio::time::sleep(Duration::from_millis(500)).await;
    provider.emit(Some(member()));
    settle().await;

    assert_eq!(
        recorder.views(),
        vec![
            SessionView {
                identity: None,
                resolving: true
            },
            SessionView {
                identity: Some(member()),
                resolving: false
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_logout_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();

    {
        let (provider, reconciler) = open_session(temp_dir.path());
        let _subscription = reconciler.start(|_| {}).unwrap();
        provider.emit(Some(member()));
        settle().await;
        reconciler.logout().await.unwrap();
    }

    let marker = FileIntentMarker::open(temp_dir.path().join("intent.json"));
    assert!(!marker.get());

    // Restarted: a null is believed at once
    let (provider, reconciler) = open_session(temp_dir.path());
    let recorder = Recorder::new();
    let _subscription = reconciler.start(recorder.listener()).unwrap();
    provider.emit(None);
    settle().await;

    assert!(reconciler.snapshot().is_unauthenticated());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_session_does_not_wait_after_restart() {
    let temp_dir = tempfile::tempdir().unwrap();

    {
        let (provider, reconciler) = open_session(temp_dir.path());
        let _subscription = reconciler.start(|_| {}).unwrap();
        provider.emit(Some(member()));
        settle().await;
        provider.emit(None);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(reconciler.snapshot().is_unauthenticated());
    }

    let (provider, reconciler) = open_session(temp_dir.path());
    let _subscription = reconciler.start(|_| {}).unwrap();
    provider.emit(None);
    settle().await;

    assert!(reconciler.snapshot().is_unauthenticated());
}
