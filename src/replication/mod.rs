//! Cross-region document replication. Grounded on
//! `internal/replication/interface.go`: a `Replicator` trait a single
//! `Engine` talks to, independent of the transport underneath it. Active-
//! active replication lets clients write to any region; documents converge
//! through the configured Strategy's merge, not through replication order.

pub mod nats;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use self::nats::NatsReplicator;

/// A peer node in the replication cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    pub last_seen_unix_ms: i64,
}

/// A document change to be replicated to every other region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub workspace_id: String,
    pub changes: Vec<u8>,
    pub origin_region: String,
    pub origin_server_id: String,
    pub timestamp_unix_ms: i64,
}

/// Invoked once per change event received from a peer. Returning `Err`
/// causes the transport to redeliver the event later.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: ChangeEvent) -> Result<()>;
}

/// Manages cross-region document synchronization. Implementations must be
/// safe to share behind an `Arc` and to call concurrently.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Fire-and-forget, best-effort-but-durable broadcast to every peer.
    async fn broadcast(&self, event: ChangeEvent) -> Result<()>;

    /// Registers the handler invoked for every change received from a
    /// peer. Subscribing twice is implementation-defined; callers should
    /// subscribe exactly once per Replicator instance.
    async fn subscribe(&self, handler: Box<dyn ChangeHandler>) -> Result<()>;

    fn peers(&self) -> Vec<Replica>;

    fn healthy(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Configuration shared by every `Replicator` implementation.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub server_id: String,
    pub region: String,
    pub nats_urls: Vec<String>,
    pub stream_name: String,
    pub consumer_durable_name: String,
    pub reconnect_wait: Duration,
    pub max_reconnects: Option<usize>,
}

impl ReplicationConfig {
    pub fn new(server_id: impl Into<String>, region: impl Into<String>, nats_urls: Vec<String>) -> Self {
        let server_id = server_id.into();
        let consumer_durable_name = format!("etherply-{server_id}");
        Self {
            server_id,
            region: region.into(),
            nats_urls,
            stream_name: "ETHERPLY_REPLICATION".to_string(),
            consumer_durable_name,
            reconnect_wait: Duration::from_secs(2),
            max_reconnects: None,
        }
    }
}
