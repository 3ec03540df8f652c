//! LSM-style on-disk `Store`, backed by `sled`. Grounded on
//! `internal/store/badger.go` (the same namespace+key composite-key
//! approach) but using an explicit NUL separator instead of `"ns:key"`
//! string concatenation, so a namespace or key containing `:` cannot collide
//! across namespaces (the Go original calls its own split "primitive").

use std::collections::HashMap;

use super::{Store, StoreStats};
use crate::error::{Result, SyncError};

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn composite_key(namespace: &str, key: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(namespace.len() + key.len() + 1);
        buf.extend_from_slice(namespace.as_bytes());
        buf.push(0);
        buf.extend_from_slice(key.as_bytes());
        buf
    }

    fn split_composite_key(raw: &[u8]) -> Option<(String, String)> {
        let idx = raw.iter().position(|&b| b == 0)?;
        let ns = String::from_utf8(raw[..idx].to_vec()).ok()?;
        let key = String::from_utf8(raw[idx + 1..].to_vec()).ok()?;
        Some((ns, key))
    }
}

impl Store for SledStore {
    fn get(&self, namespace: &str, key: &str) -> Result<(Vec<u8>, bool)> {
        let composite = Self::composite_key(namespace, key);
        match self
            .db
            .get(&composite)
            .map_err(|e| SyncError::Storage(e.to_string()))?
        {
            Some(ivec) => Ok((ivec.to_vec(), true)),
            None => Ok((Vec::new(), false)),
        }
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let composite = Self::composite_key(namespace, key);
        self.db
            .insert(composite, value)
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        // Flush synchronously so the write is durable before we return,
        // matching the "Set must be durable before return" contract.
        self.db
            .flush()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get_all(&self, namespace: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut prefix = namespace.as_bytes().to_vec();
        prefix.push(0);
        let mut result = HashMap::new();
        for item in self.db.scan_prefix(&prefix) {
            let (raw_key, value) = item.map_err(|e| SyncError::Storage(e.to_string()))?;
            if let Some((_, key)) = Self::split_composite_key(&raw_key) {
                result.insert(key, value.to_vec());
            }
        }
        Ok(result)
    }

    fn stats(&self) -> Result<StoreStats> {
        let mut workspaces = std::collections::HashSet::new();
        let mut keys = 0usize;
        for item in self.db.iter() {
            let (raw_key, _) = item.map_err(|e| SyncError::Storage(e.to_string()))?;
            if let Some((ns, _)) = Self::split_composite_key(&raw_key) {
                workspaces.insert(ns);
                keys += 1;
            }
        }
        Ok(StoreStats {
            workspaces: workspaces.len(),
            keys,
        })
    }

    fn ping(&self) -> Result<()> {
        // A cheap read against the tree is enough to prove the store is
        // reachable; sled has no separate connection to probe.
        self.db
            .contains_key(b"__ping__")
            .map(|_| ())
            .map_err(|e| SyncError::Storage(e.to_string()))
    }

    fn close(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set("ws1", "sync_doc", b"payload").unwrap();
        let (val, present) = store.get("ws1", "sync_doc").unwrap();
        assert!(present);
        assert_eq!(val, b"payload");
    }

    #[test]
    fn namespace_isolation_with_colon_in_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set("ws:1", "k", b"a").unwrap();
        store.set("ws", "1:k", b"b").unwrap();
        assert_eq!(store.get("ws:1", "k").unwrap().0, b"a");
        assert_eq!(store.get("ws", "1:k").unwrap().0, b"b");
    }

    #[test]
    fn get_all_scopes_to_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set("ws1", "a", b"1").unwrap();
        store.set("ws1", "b", b"2").unwrap();
        store.set("ws2", "a", b"3").unwrap();
        let all = store.get_all("ws1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a").unwrap(), b"1");
    }
}
