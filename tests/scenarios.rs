//! End-to-end scenario tests driving the public `Engine` API directly,
//! without a network transport — the wire format is exercised indirectly
//! by `Engine::process_operation` and `Engine::get_full_state`.

use std::sync::Arc;

use etherply_sync::bus::Bus;
use etherply_sync::engine::{Engine, Operation};
use etherply_sync::metrics::Metrics;
use etherply_sync::store::MemoryStore;
use etherply_sync::strategy::{new_strategy, LwwStrategy, StrategyKind};
use etherply_sync::value::Value;

fn automerge_engine() -> Engine {
    Engine::new(
        Arc::new(MemoryStore::new()),
        new_strategy(StrategyKind::Automerge),
        Arc::new(Bus::new()),
        Arc::new(Metrics::new().unwrap()),
    )
}

fn lww_engine() -> Engine {
    Engine::new(
        Arc::new(MemoryStore::new()),
        Box::new(LwwStrategy::new()),
        Arc::new(Bus::new()),
        Arc::new(Metrics::new().unwrap()),
    )
}

#[tokio::test]
async fn echo_populates_document_and_history() {
    let engine = automerge_engine();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "title".into(),
            value: Value::String("Hello".into()),
            timestamp_us: 1000,
        })
        .await
        .unwrap();

    let snapshot = engine.get_full_state("w1").unwrap();
    assert_eq!(snapshot.data.get("title"), Some(&Value::String("Hello".into())));

    let history = engine.get_history("w1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "set title");
}

#[tokio::test]
async fn lww_stale_write_is_rejected() {
    let engine = lww_engine();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "x".into(),
            value: Value::String("new".into()),
            timestamp_us: 5000,
        })
        .await
        .unwrap();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "x".into(),
            value: Value::String("old".into()),
            timestamp_us: 4000,
        })
        .await
        .unwrap();

    let snapshot = engine.get_full_state("w1").unwrap();
    assert_eq!(snapshot.data.get("x"), Some(&Value::String("new".into())));
}

#[tokio::test]
async fn bidirectional_merge_converges_across_two_engines() {
    let engine_a = automerge_engine();
    let engine_b = automerge_engine();

    engine_a
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "a".into(),
            value: Value::String("A1".into()),
            timestamp_us: 1,
        })
        .await
        .unwrap();
    engine_b
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "b".into(),
            value: Value::String("B1".into()),
            timestamp_us: 2,
        })
        .await
        .unwrap();

    let bytes_a = engine_a.get_changes("w1", &[]).unwrap();
    let bytes_b = engine_b.get_changes("w1", &[]).unwrap();

    engine_a.apply_remote_changes("w1", &bytes_b).await.unwrap();
    engine_b.apply_remote_changes("w1", &bytes_a).await.unwrap();

    let state_a = engine_a.get_full_state("w1").unwrap().data;
    let state_b = engine_b.get_full_state("w1").unwrap().data;
    assert_eq!(state_a, state_b);
    assert_eq!(state_a.get("a"), Some(&Value::String("A1".into())));
    assert_eq!(state_a.get("b"), Some(&Value::String("B1".into())));
}

#[tokio::test]
async fn delta_since_early_heads_is_smaller_than_full_sync() {
    let engine = automerge_engine();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "k0".into(),
            value: Value::String("v0".into()),
            timestamp_us: 0,
        })
        .await
        .unwrap();
    let heads = engine.get_full_state("w1").unwrap().heads;

    for i in 1..21 {
        engine
            .process_operation(Operation {
                workspace_id: "w1".into(),
                key: format!("k{i}"),
                value: Value::String(format!("v{i}-{}", "x".repeat(64))),
                timestamp_us: i,
            })
            .await
            .unwrap();
    }

    let delta = engine.get_changes("w1", &heads).unwrap();
    let full = engine.get_changes("w1", &[]).unwrap();
    assert!(delta.len() < full.len());
}

#[tokio::test]
async fn invalid_head_is_rejected_without_state_change() {
    let engine = automerge_engine();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "a".into(),
            value: Value::String("A1".into()),
            timestamp_us: 1,
        })
        .await
        .unwrap();

    let before = engine.get_full_state("w1").unwrap().data;
    let err = engine.get_changes("w1", &["not-a-hash".to_string()]);
    assert!(err.is_err());
    let after = engine.get_full_state("w1").unwrap().data;
    assert_eq!(before, after);
}

#[tokio::test]
async fn process_operation_validates_required_fields() {
    let engine = automerge_engine();

    let missing_workspace = engine
        .process_operation(Operation {
            workspace_id: String::new(),
            key: "a".into(),
            value: Value::Null,
            timestamp_us: 1,
        })
        .await;
    assert!(missing_workspace.is_err());

    let missing_key = engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: String::new(),
            value: Value::Null,
            timestamp_us: 1,
        })
        .await;
    assert!(missing_key.is_err());

    // Neither invalid call should have created a document.
    let snapshot = engine.get_full_state("w1").unwrap();
    assert!(snapshot.data.is_empty());
}

#[tokio::test]
async fn namespaces_stay_isolated_across_workspaces() {
    let engine = automerge_engine();
    engine
        .process_operation(Operation {
            workspace_id: "w1".into(),
            key: "k".into(),
            value: Value::String("a".into()),
            timestamp_us: 1,
        })
        .await
        .unwrap();
    engine
        .process_operation(Operation {
            workspace_id: "w2".into(),
            key: "k".into(),
            value: Value::String("b".into()),
            timestamp_us: 1,
        })
        .await
        .unwrap();

    assert_eq!(
        engine.get_full_state("w1").unwrap().data.get("k"),
        Some(&Value::String("a".into()))
    );
    assert_eq!(
        engine.get_full_state("w2").unwrap().data.get("k"),
        Some(&Value::String("b".into()))
    );
}
