//! Per-workspace read-modify-write orchestrator. Grounded on
//! `internal/crdt/engine.go`, which composes a Store directly against an
//! LWW-shaped `Operation` with no locking at all; this Engine generalizes
//! that to any `Strategy`, adds the sharded per-workspace serializer the
//! rearchitecture note recommends, and wires in Bus + Replicator
//! broadcast the MVP only sketches as a `fireSyncOperationMetric` log
//! line.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::bus::{Bus, Message as BusMessage};
use crate::error::{Result, SyncError};
use crate::metrics::Metrics;
use crate::replication::{ChangeEvent, Replicator};
use crate::store::{Store, DOC_KEY};
use crate::strategy::{Change, Strategy};
use crate::value::Value;

/// An incoming client mutation. `timestamp_us` of zero means "use
/// wall-clock now" — the Engine substitutes it before calling Strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub workspace_id: String,
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub timestamp_us: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub data: BTreeMap<String, Value>,
    pub heads: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub store: crate::store::StoreStats,
    pub strategy: String,
}

struct Replication {
    replicator: Arc<dyn Replicator>,
    region: String,
    server_id: String,
}

pub struct Engine {
    store: Arc<dyn Store>,
    strategy: Box<dyn Strategy>,
    bus: Arc<Bus>,
    metrics: Arc<Metrics>,
    replication: RwLock<Option<Replication>>,
    workspace_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, strategy: Box<dyn Strategy>, bus: Arc<Bus>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            strategy,
            bus,
            metrics,
            replication: RwLock::new(None),
            workspace_locks: DashMap::new(),
        }
    }

    /// One-time wiring of cross-region replication after construction.
    /// Calling it again replaces the previous replicator.
    pub async fn set_replicator(&self, replicator: Arc<dyn Replicator>, region: impl Into<String>, server_id: impl Into<String>) {
        let mut slot = self.replication.write().await;
        *slot = Some(Replication {
            replicator,
            region: region.into(),
            server_id: server_id.into(),
        });
    }

    fn workspace_lock(&self, workspace_id: &str) -> Arc<Mutex<()>> {
        self.workspace_locks
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn process_operation(&self, mut op: Operation) -> Result<()> {
        if op.workspace_id.is_empty() {
            return Err(SyncError::InvalidArgument("workspace_id is required".into()));
        }
        if op.key.is_empty() {
            return Err(SyncError::InvalidArgument("key is required".into()));
        }
        if op.timestamp_us == 0 {
            op.timestamp_us = now_micros();
        }

        let lock = self.workspace_lock(&op.workspace_id);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let current = self.load_document(&op.workspace_id)?;
        let new_bytes = self
            .strategy
            .process_write(&current, &op.key, &op.value, op.timestamp_us)
            .map_err(|e| SyncError::Strategy(e.to_string()))?;
        self.store.set(&op.workspace_id, DOC_KEY, &new_bytes)?;

        self.metrics
            .operation_duration_seconds
            .with_label_values(&[self.strategy.name()])
            .observe(start.elapsed().as_secs_f64());
        self.metrics.operations_total.inc();

        self.replicate(&op.workspace_id, new_bytes).await;

        Ok(())
    }

    pub fn get_full_state(&self, workspace_id: &str) -> Result<Snapshot> {
        let doc = self.load_document(workspace_id)?;
        let data = self.strategy.get_state(&doc)?;
        let heads = self.strategy.get_heads(&doc)?;
        Ok(Snapshot { data, heads })
    }

    pub fn get_changes(&self, workspace_id: &str, since_heads: &[String]) -> Result<Vec<u8>> {
        let doc = self.load_document(workspace_id)?;
        self.strategy.get_changes(&doc, since_heads)
    }

    pub fn get_history(&self, workspace_id: &str) -> Result<Vec<Change>> {
        let doc = self.load_document(workspace_id)?;
        self.strategy.get_history(&doc)
    }

    /// Merges remote document bytes into local state. Empty `remote_bytes`
    /// is a no-op (the Replicator's loop-suppression already filtered
    /// self-originated events before this is reached).
    pub async fn apply_remote_changes(&self, workspace_id: &str, remote_bytes: &[u8]) -> Result<()> {
        if remote_bytes.is_empty() {
            return Ok(());
        }

        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock().await;

        let local = self.load_document(workspace_id)?;
        let merged = self.strategy.merge(&local, remote_bytes)?;
        self.store.set(workspace_id, DOC_KEY, &merged)?;

        self.publish_frame(workspace_id, init_frame(self.strategy.as_ref(), &merged)?, None);

        Ok(())
    }

    /// Publishes a pre-built frame to the workspace's Bus topic and
    /// records it in the broadcast counter. Sessions use this instead of
    /// reaching into `Bus` directly so the metric stays accurate
    /// regardless of which path produced the frame.
    pub fn publish_frame(&self, workspace_id: &str, payload: Vec<u8>, sender_id: Option<String>) {
        self.bus.publish(BusMessage {
            topic: workspace_id.to_string(),
            payload,
            sender_id,
        });
        self.metrics.messages_broadcast_total.inc();
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats()?,
            strategy: self.strategy.name().to_string(),
        })
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }

    fn load_document(&self, workspace_id: &str) -> Result<Vec<u8>> {
        let (bytes, present) = self.store.get(workspace_id, DOC_KEY)?;
        if !present {
            return Ok(Vec::new());
        }
        Ok(bytes)
    }

    async fn replicate(&self, workspace_id: &str, document_bytes: Vec<u8>) {
        let slot = self.replication.read().await;
        let Some(replication) = slot.as_ref() else {
            return;
        };

        let event = ChangeEvent {
            workspace_id: workspace_id.to_string(),
            changes: document_bytes,
            origin_region: replication.region.clone(),
            origin_server_id: replication.server_id.clone(),
            timestamp_unix_ms: now_micros() / 1000,
        };

        if let Err(e) = replication.replicator.broadcast(event).await {
            tracing::warn!(workspace_id, error = %e, "replication broadcast failed, local write stands");
        }
    }
}

fn init_frame(strategy: &dyn Strategy, doc: &[u8]) -> Result<Vec<u8>> {
    let data = strategy.get_state(doc)?;
    let heads = strategy.get_heads(doc)?;
    let frame = serde_json::json!({ "type": "init", "data": data, "heads": heads });
    serde_json::to_vec(&frame).map_err(|e| SyncError::Internal(e.to_string()))
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::strategy::ServerAuthStrategy;

    fn test_engine() -> Engine {
        Engine::new(
            Arc::new(MemoryStore::new()),
            Box::new(ServerAuthStrategy::new()),
            Arc::new(Bus::new()),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn empty_workspace_id_is_invalid_argument() {
        let engine = test_engine();
        let op = Operation {
            workspace_id: String::new(),
            key: "a".into(),
            value: Value::String("x".into()),
            timestamp_us: 1,
        };
        let err = engine.process_operation(op).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_key_is_invalid_argument() {
        let engine = test_engine();
        let op = Operation {
            workspace_id: "ws1".into(),
            key: String::new(),
            value: Value::String("x".into()),
            timestamp_us: 1,
        };
        let err = engine.process_operation(op).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn write_then_read_full_state() {
        let engine = test_engine();
        let op = Operation {
            workspace_id: "ws1".into(),
            key: "title".into(),
            value: Value::String("Hello".into()),
            timestamp_us: 1000,
        };
        engine.process_operation(op).await.unwrap();
        let snapshot = engine.get_full_state("ws1").unwrap();
        assert_eq!(snapshot.data.get("title"), Some(&Value::String("Hello".into())));
    }

    #[tokio::test]
    async fn zero_timestamp_is_substituted_with_wall_clock() {
        let engine = test_engine();
        let op = Operation {
            workspace_id: "ws1".into(),
            key: "title".into(),
            value: Value::String("Hello".into()),
            timestamp_us: 0,
        };
        engine.process_operation(op).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_writes_to_distinct_workspaces_both_succeed() {
        let engine = Arc::new(test_engine());
        let a = engine.clone();
        let b = engine.clone();
        let t1 = tokio::spawn(async move {
            a.process_operation(Operation {
                workspace_id: "ws1".into(),
                key: "k".into(),
                value: Value::String("a".into()),
                timestamp_us: 1,
            })
            .await
        });
        let t2 = tokio::spawn(async move {
            b.process_operation(Operation {
                workspace_id: "ws2".into(),
                key: "k".into(),
                value: Value::String("b".into()),
                timestamp_us: 1,
            })
            .await
        });
        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
        assert_eq!(
            engine.get_full_state("ws1").unwrap().data.get("k"),
            Some(&Value::String("a".into()))
        );
        assert_eq!(
            engine.get_full_state("ws2").unwrap().data.get("k"),
            Some(&Value::String("b".into()))
        );
    }

    #[tokio::test]
    async fn empty_remote_changes_is_a_no_op() {
        let engine = test_engine();
        engine.apply_remote_changes("ws1", &[]).await.unwrap();
        assert!(engine.get_full_state("ws1").unwrap().data.is_empty());
    }
}
