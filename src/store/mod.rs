//! Namespaced durable key→bytes map.
//!
//! `Get`/`Set` operate on raw document bytes; the Engine is the only caller
//! that knows those bytes are Strategy-defined documents. Namespace =
//! workspace id for the Engine's hot path; auxiliary subsystems use
//! `sys:`-prefixed namespaces, which this trait enforces only by convention —
//! Store itself treats namespaces opaquely and never inspects a key's
//! contents.

pub mod memory;
pub mod sled_store;

use crate::error::Result;
use std::collections::HashMap;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// The reserved key under which a workspace's single Document lives.
pub const DOC_KEY: &str = "sync_doc";

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub workspaces: usize,
    pub keys: usize,
}

/// A namespaced durable key→bytes map. Implementations must be `Send +
/// Sync` and safe to share behind an `Arc` across the Engine's workers.
pub trait Store: Send + Sync {
    /// Returns the raw bytes and a presence flag. Not-found is `Ok((vec![],
    /// false))`, never an error.
    fn get(&self, namespace: &str, key: &str) -> Result<(Vec<u8>, bool)>;

    /// Atomically writes. Must be durable before returning `Ok`.
    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Enumerates a namespace. Used by auxiliary tools (control-plane,
    /// history dumps), not by the Engine's per-operation hot path.
    fn get_all(&self, namespace: &str) -> Result<HashMap<String, Vec<u8>>>;

    /// Aggregate stats: at minimum a workspace count and total key count.
    fn stats(&self) -> Result<StoreStats>;

    /// `Ok(())` iff the backing storage is reachable.
    fn ping(&self) -> Result<()>;

    /// Flushes and releases resources. Safe to call more than once.
    fn close(&self) -> Result<()>;
}
