//! Server-authoritative strategy. Grounded on
//! `internal/sync/server_auth.go`: server state always wins, no heads, no
//! history, no deltas.

use std::collections::BTreeMap;

use super::{Change, Strategy};
use crate::error::{Result, SyncError};
use crate::value::Value;

#[derive(Default)]
pub struct ServerAuthStrategy;

impl ServerAuthStrategy {
    pub fn new() -> Self {
        Self
    }

    fn load(&self, data: &[u8]) -> Result<BTreeMap<String, Value>> {
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(data).map_err(|e| SyncError::Strategy(e.to_string()))
    }
}

impl Strategy for ServerAuthStrategy {
    fn process_write(
        &self,
        current: &[u8],
        key: &str,
        value: &Value,
        _ts_us: i64,
    ) -> Result<Vec<u8>> {
        let mut doc = self.load(current)?;
        doc.insert(key.to_string(), value.clone());
        serde_json::to_vec(&doc).map_err(|e| SyncError::Strategy(e.to_string()))
    }

    fn merge(&self, local: &[u8], remote: &[u8]) -> Result<Vec<u8>> {
        if local.is_empty() {
            return Ok(remote.to_vec());
        }
        // Server wins: remote is discarded unconditionally when local
        // already has a document, even if remote is non-empty.
        Ok(local.to_vec())
    }

    fn get_state(&self, doc: &[u8]) -> Result<BTreeMap<String, Value>> {
        self.load(doc)
    }

    fn get_heads(&self, _doc: &[u8]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn get_changes(&self, doc: &[u8], _since_heads: &[String]) -> Result<Vec<u8>> {
        Ok(doc.to_vec())
    }

    fn get_history(&self, _doc: &[u8]) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "server-auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_unconditionally_overwrites() {
        let s = ServerAuthStrategy::new();
        let doc = s
            .process_write(&[], "title", &Value::String("a".into()), 1)
            .unwrap();
        let doc = s
            .process_write(&doc, "title", &Value::String("b".into()), 0)
            .unwrap();
        let state = s.get_state(&doc).unwrap();
        assert_eq!(state.get("title"), Some(&Value::String("b".into())));
    }

    #[test]
    fn merge_discards_remote_when_local_nonempty() {
        let s = ServerAuthStrategy::new();
        let local = s
            .process_write(&[], "x", &Value::String("local".into()), 1)
            .unwrap();
        let remote = s
            .process_write(&[], "x", &Value::String("remote".into()), 2)
            .unwrap();
        let merged = s.merge(&local, &remote).unwrap();
        assert_eq!(merged, local);
    }

    #[test]
    fn merge_takes_remote_when_local_empty() {
        let s = ServerAuthStrategy::new();
        let remote = s
            .process_write(&[], "x", &Value::String("remote".into()), 2)
            .unwrap();
        let merged = s.merge(&[], &remote).unwrap();
        assert_eq!(merged, remote);
    }
}
