//! Adaptation controller tests: baseline persistence, variance gating,
//! review parking, measurement rollback, and the emergency stop.

mod common;

use common::harness;
use praxis::adaptation::{
    AdaptationController, AdaptationState, BASELINE_NODE_ID, ChangeStatus, ObservationWindow,
    ReviewOutcome, TunableConfig,
};
use praxis::types::GraphScope;

#[tokio::test]
async fn baseline_is_snapshotted_into_identity_scope() {
    let h = harness().await;

    let node = h
        .ctx
        .graph
        .get_node(BASELINE_NODE_ID, GraphScope::Identity)
        .await
        .unwrap()
        .expect("baseline node");
    assert_eq!(node.node_type, "config");
    let stored: TunableConfig = serde_json::from_value(node.attributes).unwrap();
    assert!((stored.coherence_threshold - 0.80).abs() < f64::EPSILON);
}

#[tokio::test]
async fn quiet_window_produces_no_changes() {
    let h = harness().await;

    let result = h.ctx.adaptation.run_cycle().await.unwrap();
    assert_eq!(result.proposals_generated, 0);
    assert_eq!(result.changes_applied, 0);
    assert_eq!(result.state, AdaptationState::Learning);
    assert!(result.variance_after < f64::EPSILON);
}

#[tokio::test]
async fn repeated_coherence_failures_propose_and_apply_within_ceiling() {
    let h = harness().await;

    let observation = ObservationWindow {
        signals: 4,
        guardrail_failures: 4,
        coherence_failures: 4,
        ..ObservationWindow::default()
    };
    let result = h.ctx.adaptation.run_cycle_with(observation).await.unwrap();

    assert_eq!(result.proposals_generated, 1);
    assert_eq!(result.changes_applied, 1);
    assert_eq!(result.state, AdaptationState::Stabilizing);
    assert!(result.variance_after > result.variance_before);
    assert!(result.variance_after <= 20.0);

    // The live guardrail config moved.
    let guardrails = h.ctx.adaptation.guardrail_config().await;
    assert!((guardrails.coherence_threshold - 0.78).abs() < 1e-9);

    // The change is audited.
    let history = h.ctx.adaptation.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ChangeStatus::Applied);
    assert_eq!(history[0].target_path, "guardrails.coherence_threshold");
}

#[tokio::test]
async fn measurement_rolls_back_ineffective_changes() {
    let h = harness().await;

    let pre = ObservationWindow {
        signals: 4,
        guardrail_failures: 4,
        coherence_failures: 4,
        ..ObservationWindow::default()
    };
    h.ctx.adaptation.run_cycle_with(pre).await.unwrap();

    // Post-change window is no better: roll back.
    let post = ObservationWindow {
        signals: 6,
        guardrail_failures: 6,
        coherence_failures: 6,
        ..ObservationWindow::default()
    };
    let rolled_back = h.ctx.adaptation.measure(&pre, &post).await.unwrap();
    assert_eq!(rolled_back, 1);

    let guardrails = h.ctx.adaptation.guardrail_config().await;
    assert!((guardrails.coherence_threshold - 0.80).abs() < 1e-9);
    assert_eq!(h.ctx.adaptation.state().await, AdaptationState::Learning);

    let history = h.ctx.adaptation.history().await;
    assert_eq!(history[0].status, ChangeStatus::RolledBack);
    assert_eq!(history[0].effective, Some(false));
}

#[tokio::test]
async fn over_ceiling_proposals_park_in_reviewing() {
    let h = harness().await;
    // A tiny ceiling forces review for any proposal.
    let controller = AdaptationController::new(
        TunableConfig {
            entropy_threshold: 0.40,
            coherence_threshold: 0.80,
            optimization_veto_ratio: 10.0,
            ponder_cap: 7,
            retry_max_attempts: 3,
            llm_temperature: 0.0,
        },
        0.0001,
        praxis::signals::WindowBuffer::new(16),
        h.ctx.graph.clone(),
        h.ctx.audit.clone(),
    );

    let observation = ObservationWindow {
        signals: 4,
        guardrail_failures: 4,
        coherence_failures: 4,
        ..ObservationWindow::default()
    };
    let result = controller.run_cycle_with(observation).await.unwrap();
    assert!(result.requires_review);
    assert_eq!(result.state, AdaptationState::Reviewing);
    assert_eq!(result.changes_applied, 0);

    // Nothing applied while parked.
    let guardrails = controller.guardrail_config().await;
    assert!((guardrails.coherence_threshold - 0.80).abs() < f64::EPSILON);

    // An approving review with a raised ceiling applies the change.
    let review = ReviewOutcome {
        reviewer_id: "wa-2025-01-01-ROOT00".into(),
        approved_changes: Vec::new(),
        rejected_changes: Vec::new(),
        resume_adaptation: true,
        new_variance_ceiling: Some(20.0),
    };
    let applied = controller.apply_review(review).await.unwrap();
    // No ids were approved, so nothing applied, but adaptation resumes.
    assert_eq!(applied, 0);
    assert_eq!(controller.state().await, AdaptationState::Learning);
}

#[tokio::test]
async fn emergency_stop_halts_until_cleared() {
    let h = harness().await;

    h.ctx.adaptation.emergency_stop("operator request").await;
    assert_eq!(h.ctx.adaptation.state().await, AdaptationState::Halted);

    // Cycles are inert while halted.
    let observation = ObservationWindow {
        signals: 10,
        guardrail_failures: 10,
        coherence_failures: 10,
        ..ObservationWindow::default()
    };
    let result = h.ctx.adaptation.run_cycle_with(observation).await.unwrap();
    assert_eq!(result.state, AdaptationState::Halted);
    assert_eq!(result.changes_applied, 0);

    h.ctx.adaptation.clear_halt().await;
    assert_eq!(h.ctx.adaptation.state().await, AdaptationState::Learning);
}

#[tokio::test]
async fn cumulative_variance_never_exceeds_ceiling() {
    let h = harness().await;

    // Hammer the controller with failure windows; every applied change
    // must keep cumulative variance at or under the ceiling.
    for _ in 0..25 {
        let observation = ObservationWindow {
            signals: 4,
            guardrail_failures: 4,
            coherence_failures: 4,
            incidents: 6,
            ponder_cap_deferrals: 4,
            ..ObservationWindow::default()
        };
        let result = h.ctx.adaptation.run_cycle_with(observation).await.unwrap();
        assert!(
            result.variance_after
                <= h.ctx.config.adaptation.variance_ceiling_percent + 1e-9,
            "variance {} exceeded ceiling",
            result.variance_after
        );
        if result.requires_review {
            break;
        }
        // Leave Stabilizing so the next cycle may run.
        let quiet = ObservationWindow::default();
        let _ = h.ctx.adaptation.measure(&observation, &quiet).await;
    }
}
