//! In-memory `Store`, used by tests and by single-process development runs.
//! Grounded on `internal/store/memory.go`: a `workspace -> key -> value`
//! nested map behind one lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Store, StoreStats};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<(Vec<u8>, bool)> {
        let data = self.data.read();
        match data.get(namespace).and_then(|ns| ns.get(key)) {
            Some(v) => Ok((v.clone(), true)),
            None => Ok((Vec::new(), false)),
        }
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get_all(&self, namespace: &str) -> Result<HashMap<String, Vec<u8>>> {
        let data = self.data.read();
        Ok(data.get(namespace).cloned().unwrap_or_default())
    }

    fn stats(&self) -> Result<StoreStats> {
        let data = self.data.read();
        let keys = data.values().map(|ns| ns.len()).sum();
        Ok(StoreStats {
            workspaces: data.len(),
            keys,
        })
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_empty_namespace_is_not_found_not_error() {
        let store = MemoryStore::new();
        let (val, present) = store.get("ws1", "sync_doc").unwrap();
        assert!(!present);
        assert!(val.is_empty());
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("ws1", "sync_doc", b"hello").unwrap();
        let (val, present) = store.get("ws1", "sync_doc").unwrap();
        assert!(present);
        assert_eq!(val, b"hello");
    }

    #[test]
    fn namespace_isolation() {
        // Writes to one workspace must never be visible under another.
        let store = MemoryStore::new();
        store.set("ws1", "k", b"a").unwrap();
        store.set("ws2", "k", b"b").unwrap();
        assert_eq!(store.get("ws1", "k").unwrap().0, b"a");
        assert_eq!(store.get("ws2", "k").unwrap().0, b"b");
    }

    #[test]
    fn stats_counts_workspaces_and_keys() {
        let store = MemoryStore::new();
        store.set("ws1", "a", b"1").unwrap();
        store.set("ws1", "b", b"2").unwrap();
        store.set("ws2", "a", b"3").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.workspaces, 2);
        assert_eq!(stats.keys, 3);
    }
}
