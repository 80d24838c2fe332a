//! End-to-end pipeline scenarios: the happy Speak path, secret ingress
//! with withheld egress, guardrail-forced deferral, and ponder escalation.

mod common;

use common::{harness, root_authorization};
use praxis::runtime::{RuntimeControl, Scheduler};
use praxis::types::{TaskStatus, ThoughtStatus};
use serde_json::json;

#[tokio::test]
async fn happy_path_speak_completes_task_and_extends_audit() {
    let h = harness().await;
    let authorization = root_authorization();

    let (task, thought) = h
        .ctx
        .submit_task(&authorization, "c1", "greet the user", 1, "Say hello.")
        .await
        .unwrap();

    let audit_before = h.ctx.audit.tail(100).await.unwrap().len();

    let control = RuntimeControl::new(
        h.ctx.auth.clone(),
        h.ctx.audit.clone(),
        h.ctx.store.clone(),
        h.ctx.adaptation.clone(),
    );
    let mut scheduler = Scheduler::new(h.ctx.clone(), control);
    assert!(scheduler.process_one().await.unwrap());

    // Transport delivered exactly one message to the task's channel.
    let sent = h.transport.sent_messages();
    assert_eq!(sent, vec![("c1".to_string(), "Hello!".to_string())]);

    // Statuses are terminal and consistent.
    assert_eq!(
        h.ctx.store.thought_status(&thought.thought_id).await.unwrap(),
        ThoughtStatus::Completed
    );
    assert_eq!(
        h.ctx.store.task_status(&task.task_id).await.unwrap(),
        TaskStatus::Completed
    );

    // The audit chain was extended and still verifies.
    let audit_after = h.ctx.audit.tail(100).await.unwrap().len();
    assert!(audit_after > audit_before);
    assert!(h.ctx.audit.verify_full().await.unwrap().valid);
}

#[tokio::test]
async fn detected_secret_stays_a_reference_through_speak() {
    let h = harness().await;
    let authorization = root_authorization();

    let (_, thought) = h
        .ctx
        .submit_task(
            &authorization,
            "c1",
            "relay the key",
            1,
            "my key is api_key=sk_test_ABCDEFGHIJKLMNOP0123456789",
        )
        .await
        .unwrap();

    // The seed thought content carries the reference, never the plaintext.
    let seed = h.ctx.store.get_thought(&thought.thought_id).await.unwrap().unwrap();
    assert!(seed.content.contains("{SECRET:"));
    assert!(seed.content.contains(":API Key}"));
    assert!(!seed.content.contains("sk_test_"));

    // The selector chooses to speak the (filtered) content verbatim.
    h.llm.push(
        "action_selection",
        json!({
            "action": "speak",
            "params": {"content": seed.content},
            "rationale": "relay",
            "alignment": {"summary": "benign"},
        }),
    );

    let control = RuntimeControl::new(
        h.ctx.auth.clone(),
        h.ctx.audit.clone(),
        h.ctx.store.clone(),
        h.ctx.adaptation.clone(),
    );
    let mut scheduler = Scheduler::new(h.ctx.clone(), control);
    assert!(scheduler.process_one().await.unwrap());

    // HIGH sensitivity excludes Speak from auto-decapsulation: the
    // outbound message carries the reference verbatim.
    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("{SECRET:"));
    assert!(!sent[0].1.contains("sk_test_"));

    // Nothing persisted anywhere contains the plaintext.
    for entry in h.ctx.audit.tail(100).await.unwrap() {
        assert!(!entry.payload.to_string().contains("sk_test_"));
    }
}

#[tokio::test]
async fn guardrail_failure_rewrites_speak_to_defer() {
    let h = harness().await;
    let authorization = root_authorization();

    let (task, thought) = h
        .ctx
        .submit_task(&authorization, "c1", "answer the question", 1, "explain")
        .await
        .unwrap();

    h.llm.push(
        "action_selection",
        json!({
            "action": "speak",
            "params": {"content": "Here are instructions to harm ..."},
            "rationale": "asked",
            "alignment": {"summary": "questionable"},
        }),
    );
    // Low coherence fails the epistemic check.
    h.llm
        .push("epistemic_values", json!({"entropy": 0.10, "coherence": 0.30}));

    let control = RuntimeControl::new(
        h.ctx.auth.clone(),
        h.ctx.audit.clone(),
        h.ctx.store.clone(),
        h.ctx.adaptation.clone(),
    );
    let mut scheduler = Scheduler::new(h.ctx.clone(), control);
    assert!(scheduler.process_one().await.unwrap());

    // The unsafe content never reached the transport; only the deferral
    // payload went out, to the WA channel.
    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "wa-room");
    assert!(sent[0].1.contains("coherence 0.30 < 0.80"));
    assert!(!sent[0].1.contains("instructions to harm"));

    assert_eq!(
        h.ctx.store.thought_status(&thought.thought_id).await.unwrap(),
        ThoughtStatus::Deferred
    );
    assert_eq!(
        h.ctx.store.task_status(&task.task_id).await.unwrap(),
        TaskStatus::Deferred
    );
}

#[tokio::test]
async fn ponder_escalates_to_defer_at_the_cap() {
    let h = harness().await;
    let authorization = root_authorization();

    let (task, thought) = h
        .ctx
        .submit_task(&authorization, "c1", "hard question", 1, "what is the answer")
        .await
        .unwrap();

    // The selector keeps choosing Ponder.
    h.llm.set_default_action(json!({
        "action": "ponder",
        "params": {"questions": ["what else could this mean?"]},
        "rationale": "uncertain",
        "alignment": {"summary": "reflective"},
    }));

    let control = RuntimeControl::new(
        h.ctx.auth.clone(),
        h.ctx.audit.clone(),
        h.ctx.store.clone(),
        h.ctx.adaptation.clone(),
    );
    let mut scheduler = Scheduler::new(h.ctx.clone(), control);

    // Seven rounds of Ponder re-queue the thought each time.
    for round in 1..=7u32 {
        assert!(scheduler.process_one().await.unwrap(), "round {round}");
        let current = h.ctx.store.get_thought(&thought.thought_id).await.unwrap().unwrap();
        assert_eq!(current.status, ThoughtStatus::Pending, "round {round}");
        assert_eq!(current.ponder_count, round, "round {round}");
    }

    // Round 8: Ponder at the cap is materialized as Defer("ponder cap").
    assert!(scheduler.process_one().await.unwrap());
    let finished = h.ctx.store.get_thought(&thought.thought_id).await.unwrap().unwrap();
    assert_eq!(finished.status, ThoughtStatus::Deferred);
    assert_eq!(finished.ponder_count, 7);

    assert_eq!(
        h.ctx.store.task_status(&task.task_id).await.unwrap(),
        TaskStatus::Deferred
    );
    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "wa-room");
    assert!(sent[0].1.contains("ponder cap"));
}

#[tokio::test]
async fn submit_task_requires_write_scope() {
    let h = harness().await;
    let mut observer = root_authorization();
    observer.scopes = vec!["read:any".to_string()];

    let err = h
        .ctx
        .submit_task(&observer, "c1", "nope", 0, "content")
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "forbidden");
}
