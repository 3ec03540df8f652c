//! Last-Write-Wins strategy. Grounded on
//! `internal/sync/lww.go`: a `field -> {value, ts_microseconds}` map
//! serialized as JSON. Equal timestamps do not overwrite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Change, Strategy};
use crate::error::{Result, SyncError};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LwwEntry {
    value: Value,
    ts: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LwwDocument {
    entries: BTreeMap<String, LwwEntry>,
}

#[derive(Default)]
pub struct LwwStrategy;

impl LwwStrategy {
    pub fn new() -> Self {
        Self
    }

    fn load_or_create(&self, data: &[u8]) -> Result<LwwDocument> {
        if data.is_empty() {
            return Ok(LwwDocument::default());
        }
        serde_json::from_slice(data).map_err(|e| SyncError::Strategy(e.to_string()))
    }
}

impl Strategy for LwwStrategy {
    fn process_write(
        &self,
        current: &[u8],
        key: &str,
        value: &Value,
        ts_us: i64,
    ) -> Result<Vec<u8>> {
        let mut doc = self.load_or_create(current)?;
        let should_set = match doc.entries.get(key) {
            Some(existing) => ts_us > existing.ts,
            None => true,
        };
        if should_set {
            doc.entries.insert(
                key.to_string(),
                LwwEntry {
                    value: value.clone(),
                    ts: ts_us,
                },
            );
        }
        serde_json::to_vec(&doc).map_err(|e| SyncError::Strategy(e.to_string()))
    }

    fn merge(&self, local: &[u8], remote: &[u8]) -> Result<Vec<u8>> {
        let mut local_doc = self.load_or_create(local)?;
        let remote_doc = self.load_or_create(remote)?;

        for (key, remote_entry) in remote_doc.entries {
            let take_remote = match local_doc.entries.get(&key) {
                Some(local_entry) => remote_entry.ts > local_entry.ts,
                None => true,
            };
            if take_remote {
                local_doc.entries.insert(key, remote_entry);
            }
        }

        serde_json::to_vec(&local_doc).map_err(|e| SyncError::Strategy(e.to_string()))
    }

    fn get_state(&self, doc: &[u8]) -> Result<BTreeMap<String, Value>> {
        let doc = self.load_or_create(doc)?;
        Ok(doc
            .entries
            .into_iter()
            .map(|(k, entry)| (k, entry.value))
            .collect())
    }

    fn get_heads(&self, doc: &[u8]) -> Result<Vec<String>> {
        let doc = self.load_or_create(doc)?;
        let max_ts = doc.entries.values().map(|e| e.ts).max();
        Ok(match max_ts {
            Some(ts) if ts > 0 => vec![ts.to_string()],
            _ => Vec::new(),
        })
    }

    fn get_changes(&self, doc: &[u8], _since_heads: &[String]) -> Result<Vec<u8>> {
        // LWW has no fine-grained history; always return the full document.
        Ok(doc.to_vec())
    }

    fn get_history(&self, _doc: &[u8]) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "lww"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_timestamp_wins() {
        // A stale write arriving after a newer one must be rejected.
        let s = LwwStrategy::new();
        let doc = s
            .process_write(&[], "x", &Value::String("new".into()), 5000)
            .unwrap();
        let doc = s
            .process_write(&doc, "x", &Value::String("old".into()), 4000)
            .unwrap();
        let state = s.get_state(&doc).unwrap();
        assert_eq!(state.get("x"), Some(&Value::String("new".into())));
    }

    #[test]
    fn equal_timestamp_does_not_overwrite() {
        let s = LwwStrategy::new();
        let doc = s
            .process_write(&[], "x", &Value::String("first".into()), 1000)
            .unwrap();
        let doc = s
            .process_write(&doc, "x", &Value::String("second".into()), 1000)
            .unwrap();
        let state = s.get_state(&doc).unwrap();
        assert_eq!(state.get("x"), Some(&Value::String("first".into())));
    }

    #[test]
    fn malformed_document_bytes_surface_as_strategy_error() {
        let s = LwwStrategy::new();
        let err = s.get_state(b"not json").unwrap_err();
        assert!(matches!(err, SyncError::Strategy(_)));
    }

    #[test]
    fn merge_picks_higher_timestamp_per_field() {
        let s = LwwStrategy::new();
        let local = s
            .process_write(&[], "a", &Value::String("local".into()), 10)
            .unwrap();
        let remote = s
            .process_write(&[], "a", &Value::String("remote".into()), 20)
            .unwrap();
        let merged = s.merge(&local, &remote).unwrap();
        let state = s.get_state(&merged).unwrap();
        assert_eq!(state.get("a"), Some(&Value::String("remote".into())));
    }
}
