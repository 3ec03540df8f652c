//! Pluggable document-merge strategy. Exactly one variant is selected at
//! Engine construction and applies to every workspace the Engine handles.
//! Grounded on `internal/sync/strategy.go`, which defines the same
//! operation set as a Go interface; here it is a Rust trait with three
//! implementers.

pub mod automerge_strategy;
pub mod lww;
pub mod server_auth;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::Value;

pub use automerge_strategy::AutomergeStrategy;
pub use lww::LwwStrategy;
pub use server_auth::ServerAuthStrategy;

/// One entry in a document's change history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub hash: String,
    pub message: String,
    pub timestamp_us: i64,
}

/// Strategy identifiers, matching the `sync_strategy` config value and
/// `sync.StrategyType` in the original Go source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Automerge,
    Lww,
    ServerAuth,
}

impl StrategyKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automerge" => Some(StrategyKind::Automerge),
            "lww" => Some(StrategyKind::Lww),
            "server-auth" => Some(StrategyKind::ServerAuth),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Automerge => "automerge",
            StrategyKind::Lww => "lww",
            StrategyKind::ServerAuth => "server-auth",
        }
    }
}

/// Pure, stateless synchronization algorithm. Implementations touch only
/// the bytes handed to them and must never panic on malformed input —
/// parse failures are reported as `Err`, never masked.
pub trait Strategy: Send + Sync {
    /// Produces updated document bytes given a current blob (possibly
    /// empty), a field name, a value, and a microsecond timestamp.
    fn process_write(
        &self,
        current: &[u8],
        key: &str,
        value: &Value,
        ts_us: i64,
    ) -> Result<Vec<u8>>;

    /// Combines two document snapshots. Contract varies per variant: see
    /// each implementation's module doc.
    fn merge(&self, local: &[u8], remote: &[u8]) -> Result<Vec<u8>>;

    /// Materializes the document as a plain map; no strategy artifacts
    /// leak into the result.
    fn get_state(&self, doc: &[u8]) -> Result<BTreeMap<String, Value>>;

    /// Opaque version tokens identifying the current revision. Empty for
    /// strategies without versioning.
    fn get_heads(&self, doc: &[u8]) -> Result<Vec<String>>;

    /// Serialized delta since `since_heads`; a full-sync payload when
    /// `since_heads` is empty.
    fn get_changes(&self, doc: &[u8], since_heads: &[String]) -> Result<Vec<u8>>;

    /// Ordered oldest→newest change log. May be empty.
    fn get_history(&self, doc: &[u8]) -> Result<Vec<Change>>;

    fn name(&self) -> &'static str;
}

/// Constructs the configured strategy. Config-level parsing of an
/// unknown/missing strategy name defaults to Automerge, mirroring
/// `sync.NewStrategy`'s `default:` fallthrough.
pub fn new_strategy(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Automerge => Box::new(AutomergeStrategy::new()),
        StrategyKind::Lww => Box::new(LwwStrategy::new()),
        StrategyKind::ServerAuth => Box::new(ServerAuthStrategy::new()),
    }
}
