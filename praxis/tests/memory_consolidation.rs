//! Graph memory and consolidation tests: the three verbs, summary
//! completeness, orphan diagnostics, and retention cleanup ordering.

use std::sync::Arc;

use chrono::{Duration, Utc};
use praxis::memory::{
    ConsolidationLevel, Consolidator, GraphEdge, GraphNodeSpec, GraphStore, MemoryError,
    RecallQuery, SUMMARIZES,
};
use praxis::store::ThoughtStore;
use praxis::types::GraphScope;
use serde_json::json;
use tempfile::TempDir;

async fn graph_store(dir: &TempDir) -> Arc<GraphStore> {
    let migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let store = ThoughtStore::open(&dir.path().join("engine.db"), &migrations, 7, 7)
        .await
        .expect("open store");
    Arc::new(GraphStore::new(store.pool().clone()))
}

fn telemetry_spec(index: usize) -> GraphNodeSpec {
    GraphNodeSpec {
        node_id: format!("metric_{index}"),
        scope: GraphScope::Local,
        node_type: "telemetry".to_string(),
        attributes: json!({"metric": "tokens", "value": index as f64}),
    }
}

#[tokio::test]
async fn memorize_increments_versions() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;

    let spec = telemetry_spec(1);
    let first = graph.memorize(&spec, "tester").await.unwrap();
    assert_eq!(first.version, 1);
    let second = graph.memorize(&spec, "tester").await.unwrap();
    assert_eq!(second.version, 2);
    assert_eq!(second.created_at, first.created_at);
}

#[tokio::test]
async fn recall_by_type_and_search() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;

    for index in 0..5 {
        graph.memorize(&telemetry_spec(index), "tester").await.unwrap();
    }
    graph
        .memorize(
            &GraphNodeSpec {
                node_id: "note_1".into(),
                scope: GraphScope::Local,
                node_type: "observation".into(),
                attributes: json!({"text": "the sky is overcast"}),
            },
            "tester",
        )
        .await
        .unwrap();

    let telemetry = graph
        .recall(&RecallQuery::ByType {
            node_type: "telemetry".into(),
            scope: GraphScope::Local,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(telemetry.len(), 5);

    let found = graph
        .recall(&RecallQuery::Search {
            text: "overcast".into(),
            scope: GraphScope::Local,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].node_id, "note_1");
}

#[tokio::test]
async fn forget_requires_explicit_edge_removals() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;

    graph.memorize(&telemetry_spec(1), "tester").await.unwrap();
    graph.memorize(&telemetry_spec(2), "tester").await.unwrap();
    let edge = GraphEdge::link("metric_1", "metric_2", GraphScope::Local, "RELATES_TO");
    graph.add_edge(&edge).await.unwrap();

    // Without naming the edge, forget refuses.
    let err = graph.forget("metric_2", GraphScope::Local, &[]).await.unwrap_err();
    assert!(matches!(err, MemoryError::StillReferenced { .. }));

    // Naming it succeeds.
    let removed = graph
        .forget("metric_2", GraphScope::Local, &[edge.edge_id.clone()])
        .await
        .unwrap();
    assert!(removed);
}

#[tokio::test]
async fn edges_require_same_scope_endpoints() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;

    graph.memorize(&telemetry_spec(1), "tester").await.unwrap();
    // metric_2 exists only in ENVIRONMENT scope.
    graph
        .memorize(
            &GraphNodeSpec {
                node_id: "metric_2".into(),
                scope: GraphScope::Environment,
                node_type: "telemetry".into(),
                attributes: json!({}),
            },
            "tester",
        )
        .await
        .unwrap();

    let edge = GraphEdge::link("metric_1", "metric_2", GraphScope::Local, "RELATES_TO");
    let err = graph.add_edge(&edge).await.unwrap_err();
    assert!(matches!(err, MemoryError::BadEdge { .. }));
}

#[tokio::test]
async fn basic_consolidation_covers_every_source_before_cleanup() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;
    let consolidator = Consolidator::new(Arc::clone(&graph));

    // 100 time-series nodes inside the trailing 6-hour window.
    for index in 0..100 {
        graph.memorize(&telemetry_spec(index), "tester").await.unwrap();
    }

    let now = Utc::now();
    let outcomes = consolidator
        .run_level(ConsolidationLevel::Basic, now)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.scope, GraphScope::Local);
    assert_eq!(outcome.source_count, 100);

    // Exactly one summary node, with a SUMMARIZES edge to every source.
    let summary = graph
        .get_node(&outcome.summary_id, GraphScope::Local)
        .await
        .unwrap()
        .expect("summary node");
    assert_eq!(
        summary.attributes["source_node_count"].as_u64(),
        Some(100)
    );
    for index in 0..100 {
        let covering = graph
            .edges_to(&format!("metric_{index}"), GraphScope::Local, SUMMARIZES)
            .await
            .unwrap();
        assert_eq!(covering.len(), 1, "metric_{index} is covered");
    }

    // Orphan check: zero orphans.
    let orphans = consolidator.orphan_scan().await.unwrap();
    assert!(orphans.is_clean(), "orphans: {:?}", orphans.orphans);

    // Cleanup a day later deletes the 100 covered sources and nothing else.
    let report = consolidator.cleanup(now + Duration::hours(25)).await.unwrap();
    assert_eq!(report.deleted_raw, 100);
    assert_eq!(report.skipped_uncovered, 0);
    for index in 0..100 {
        assert!(
            graph
                .get_node(&format!("metric_{index}"), GraphScope::Local)
                .await
                .unwrap()
                .is_none()
        );
    }
    // The summary itself survives.
    assert!(
        graph
            .get_node(&outcome.summary_id, GraphScope::Local)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn uncovered_nodes_are_never_deleted() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;
    let consolidator = Consolidator::new(Arc::clone(&graph));

    // A raw node with no summary at all.
    graph.memorize(&telemetry_spec(1), "tester").await.unwrap();

    let report = consolidator
        .cleanup(Utc::now() + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(report.deleted_raw, 0);
    assert_eq!(report.skipped_uncovered, 1);
    assert!(
        graph
            .get_node("metric_1", GraphScope::Local)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn extensive_consolidation_rolls_up_basic_summaries() {
    let dir = TempDir::new().unwrap();
    let graph = graph_store(&dir).await;
    let consolidator = Consolidator::new(Arc::clone(&graph));

    for index in 0..10 {
        graph.memorize(&telemetry_spec(index), "tester").await.unwrap();
    }
    let now = Utc::now();
    let basic = consolidator
        .run_level(ConsolidationLevel::Basic, now)
        .await
        .unwrap();
    assert_eq!(basic.len(), 1);

    let extensive = consolidator
        .run_level(ConsolidationLevel::Extensive, now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(extensive.len(), 1);
    assert_eq!(extensive[0].source_count, 1);

    // The basic summary is now covered by the extensive one.
    let covering = graph
        .edges_to(&basic[0].summary_id, GraphScope::Local, SUMMARIZES)
        .await
        .unwrap();
    assert_eq!(covering.len(), 1);
}
