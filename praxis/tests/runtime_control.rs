//! Control-plane tests: scope checks on every verb, pause/single-step
//! semantics, and the signed emergency stop.

mod common;

use chrono::Utc;
use common::{harness, root_authorization};
use praxis::auth::{SignedCommand, bootstrap_root, sign_command};
use praxis::runtime::{RuntimeControl, RuntimeState};

fn control_for(h: &common::TestHarness) -> std::sync::Arc<RuntimeControl> {
    RuntimeControl::new(
        h.ctx.auth.clone(),
        h.ctx.audit.clone(),
        h.ctx.store.clone(),
        h.ctx.adaptation.clone(),
    )
}

#[tokio::test]
async fn pause_and_resume_flip_runtime_state() {
    let h = harness().await;
    let control = control_for(&h);
    let authorization = root_authorization();

    assert_eq!(control.state(), RuntimeState::Running);
    control.pause(&authorization, "operator request").await.unwrap();
    assert_eq!(control.state(), RuntimeState::Paused);
    control.resume(&authorization).await.unwrap();
    assert_eq!(control.state(), RuntimeState::Running);
}

#[tokio::test]
async fn control_verbs_require_system_control_scope() {
    let h = harness().await;
    let control = control_for(&h);
    let mut observer = root_authorization();
    observer.scopes = vec!["read:any".to_string()];

    let err = control.pause(&observer, "nope").await.unwrap_err();
    assert_eq!(err.user_message(), "forbidden");
    let err = control.shutdown(&observer, "nope").await.unwrap_err();
    assert_eq!(err.user_message(), "forbidden");

    // Read path works with read:any.
    let status = control.queue_status(&observer).await.unwrap();
    assert_eq!(status.total_tasks, 0);
}

#[tokio::test]
async fn queue_status_requires_read_scope() {
    let h = harness().await;
    let control = control_for(&h);
    let mut stranger = root_authorization();
    stranger.scopes = vec!["write:message".to_string()];

    let err = control.queue_status(&stranger).await.unwrap_err();
    assert_eq!(err.user_message(), "forbidden");
}

#[tokio::test]
async fn request_state_transition_maps_targets() {
    let h = harness().await;
    let control = control_for(&h);
    let authorization = root_authorization();

    control
        .request_state_transition(&authorization, RuntimeState::Paused, "inspect")
        .await
        .unwrap();
    assert_eq!(control.state(), RuntimeState::Paused);

    control
        .request_state_transition(&authorization, RuntimeState::Running, "")
        .await
        .unwrap();
    assert_eq!(control.state(), RuntimeState::Running);

    // Halted is only reachable through the signed emergency command.
    let err = control
        .request_state_transition(&authorization, RuntimeState::Halted, "")
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "forbidden");
}

#[tokio::test]
async fn shutdown_cancels_in_flight_work() {
    let h = harness().await;
    let control = control_for(&h);
    let authorization = root_authorization();

    let cancel = control.cancel_receiver();
    assert!(!*cancel.borrow());
    control.shutdown(&authorization, "maintenance").await.unwrap();
    assert_eq!(control.state(), RuntimeState::ShuttingDown);
    assert!(*cancel.borrow());
}

#[tokio::test]
async fn emergency_shutdown_verifies_the_signature() {
    let h = harness().await;
    let control = control_for(&h);

    let (root, root_key) = bootstrap_root("root");
    h.ctx.auth.register_certificate(root.clone()).await.unwrap();

    // A tampered signature is refused and the state stays Running.
    let mut forged = SignedCommand {
        verb: "emergency_shutdown".into(),
        wa_id: root.wa_id.clone(),
        issued_at: Utc::now(),
        signature: "AAAA".into(),
    };
    assert!(control.emergency_shutdown(&forged).await.is_err());
    assert_eq!(control.state(), RuntimeState::Running);

    // A valid signature halts the agent and stops adaptation.
    forged.signature = sign_command(&forged, &root_key);
    control.emergency_shutdown(&forged).await.unwrap();
    assert_eq!(control.state(), RuntimeState::Halted);
    assert_eq!(
        h.ctx.adaptation.state().await,
        praxis::adaptation::AdaptationState::Halted
    );
}

#[tokio::test]
async fn control_actions_are_audited() {
    let h = harness().await;
    let control = control_for(&h);
    let authorization = root_authorization();

    control.pause(&authorization, "audit me").await.unwrap();
    let entries = h.ctx.audit.tail(10).await.unwrap();
    let control_entries: Vec<_> = entries
        .iter()
        .filter(|entry| entry.event_type == "runtime_control")
        .collect();
    assert!(!control_entries.is_empty());
    assert!(
        control_entries
            .iter()
            .any(|entry| entry.payload["verb"] == "pause")
    );
}
