//! Automerge CRDT strategy. Grounded on `internal/sync/automerge.go`,
//! translated from the Go `automerge-go` bindings onto the native
//! `automerge` crate. `process_write` sets a top-level field and commits
//! with `message = "set <key>"`; `merge` is Automerge's CRDT merge
//! (idempotent, commutative, associative regardless of arrival order);
//! `get_changes` frames each change as `[4-byte BE length][change bytes]`,
//! reproducing the manual big-endian packing in the Go original.

use std::collections::BTreeMap;

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ChangeHash, ObjId, ObjType, ReadDoc, ScalarValue, Value as AmValue};

use super::{Change, Strategy};
use crate::error::{Result, SyncError};
use crate::value::Value;

pub struct AutomergeStrategy;

fn strategy_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::Strategy(e.to_string())
}

impl AutomergeStrategy {
    pub fn new() -> Self {
        Self
    }

    fn load_or_create(&self, current: &[u8]) -> Result<AutoCommit> {
        if current.is_empty() {
            Ok(AutoCommit::new())
        } else {
            AutoCommit::load(current)
                .map_err(|e| SyncError::Strategy(format!("failed to load automerge doc: {e}")))
        }
    }

    fn write_map_entry(
        doc: &mut AutoCommit,
        obj: &ObjId,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        match value {
            Value::Null => doc.put(obj, key, ScalarValue::Null).map_err(strategy_err),
            Value::Bool(b) => doc.put(obj, key, *b).map_err(strategy_err),
            Value::Number(n) => Self::put_number(doc, obj, key, n),
            Value::String(s) => doc.put(obj, key, s.as_str()).map_err(strategy_err),
            Value::List(items) => {
                let list_id = doc
                    .put_object(obj, key, ObjType::List)
                    .map_err(strategy_err)?;
                for (i, item) in items.iter().enumerate() {
                    Self::insert_list_entry(doc, &list_id, i, item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                let map_id = doc
                    .put_object(obj, key, ObjType::Map)
                    .map_err(strategy_err)?;
                for (k, v) in map {
                    Self::write_map_entry(doc, &map_id, k, v)?;
                }
                Ok(())
            }
        }
    }

    fn insert_list_entry(
        doc: &mut AutoCommit,
        obj: &ObjId,
        index: usize,
        value: &Value,
    ) -> Result<()> {
        match value {
            Value::Null => doc.insert(obj, index, ScalarValue::Null).map_err(strategy_err),
            Value::Bool(b) => doc.insert(obj, index, *b).map_err(strategy_err),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    doc.insert(obj, index, i).map_err(strategy_err)
                } else if let Some(f) = n.as_f64() {
                    doc.insert(obj, index, f).map_err(strategy_err)
                } else {
                    doc.insert(obj, index, n.to_string()).map_err(strategy_err)
                }
            }
            Value::String(s) => doc.insert(obj, index, s.as_str()).map_err(strategy_err),
            Value::List(items) => {
                let list_id = doc
                    .insert_object(obj, index, ObjType::List)
                    .map_err(strategy_err)?;
                for (i, item) in items.iter().enumerate() {
                    Self::insert_list_entry(doc, &list_id, i, item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                let map_id = doc
                    .insert_object(obj, index, ObjType::Map)
                    .map_err(strategy_err)?;
                for (k, v) in map {
                    Self::write_map_entry(doc, &map_id, k, v)?;
                }
                Ok(())
            }
        }
    }

    fn put_number(
        doc: &mut AutoCommit,
        obj: &ObjId,
        key: &str,
        n: &serde_json::Number,
    ) -> Result<()> {
        if let Some(i) = n.as_i64() {
            doc.put(obj, key, i).map_err(strategy_err)
        } else if let Some(f) = n.as_f64() {
            doc.put(obj, key, f).map_err(strategy_err)
        } else {
            // u64 too large for i64: fall back to string so nothing is lost.
            doc.put(obj, key, n.to_string()).map_err(strategy_err)
        }
    }

    fn read_obj(doc: &mut AutoCommit, obj: &ObjId, obj_type: ObjType) -> Result<Value> {
        match obj_type {
            ObjType::Map | ObjType::Table => {
                let keys: Vec<String> = doc.keys(obj).collect();
                let mut map = BTreeMap::new();
                for key in keys {
                    let entry = doc.get(obj, &key).map_err(strategy_err)?;
                    if let Some((val, id)) = entry {
                        let converted = match val {
                            AmValue::Object(obj_type) => Self::read_obj(doc, &id, obj_type)?,
                            AmValue::Scalar(s) => Self::scalar_to_value(&s),
                        };
                        map.insert(key, converted);
                    }
                }
                Ok(Value::Map(map))
            }
            ObjType::List | ObjType::Text => {
                let len = doc.length(obj);
                let mut list = Vec::with_capacity(len);
                for i in 0..len {
                    let entry = doc.get(obj, i).map_err(strategy_err)?;
                    if let Some((val, id)) = entry {
                        let converted = match val {
                            AmValue::Object(obj_type) => Self::read_obj(doc, &id, obj_type)?,
                            AmValue::Scalar(s) => Self::scalar_to_value(&s),
                        };
                        list.push(converted);
                    }
                }
                Ok(Value::List(list))
            }
        }
    }

    fn scalar_to_value(s: &ScalarValue) -> Value {
        match s {
            ScalarValue::Null => Value::Null,
            ScalarValue::Boolean(b) => Value::Bool(*b),
            ScalarValue::Str(s) => Value::String(s.to_string()),
            ScalarValue::Int(i) => Value::Number((*i).into()),
            ScalarValue::Uint(u) => Value::Number((*u).into()),
            ScalarValue::F64(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Counter(c) => Value::Number((i64::from(c.clone())).into()),
            ScalarValue::Timestamp(ts) => Value::Number((*ts).into()),
            ScalarValue::Bytes(b) => Value::String(hex_encode(b)),
            ScalarValue::Unknown { .. } => Value::Null,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Strategy for AutomergeStrategy {
    fn process_write(
        &self,
        current: &[u8],
        key: &str,
        value: &Value,
        ts_us: i64,
    ) -> Result<Vec<u8>> {
        let mut doc = self.load_or_create(current)?;
        Self::write_map_entry(&mut doc, &automerge::ROOT, key, value)?;
        let opts = automerge::transaction::CommitOptions::default()
            .with_message(format!("set {key}"))
            .with_time(ts_us);
        doc.commit_with(opts);
        Ok(doc.save())
    }

    fn merge(&self, local: &[u8], remote: &[u8]) -> Result<Vec<u8>> {
        if remote.is_empty() {
            return Ok(local.to_vec());
        }
        if local.is_empty() {
            return Ok(remote.to_vec());
        }
        let mut local_doc = self.load_or_create(local)?;
        let mut remote_doc = self.load_or_create(remote)?;
        local_doc.merge(&mut remote_doc).map_err(strategy_err)?;
        Ok(local_doc.save())
    }

    fn get_state(&self, doc: &[u8]) -> Result<BTreeMap<String, Value>> {
        if doc.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut doc = self.load_or_create(doc)?;
        match Self::read_obj(&mut doc, &automerge::ROOT, ObjType::Map)? {
            Value::Map(m) => Ok(m),
            _ => Ok(BTreeMap::new()),
        }
    }

    fn get_heads(&self, doc: &[u8]) -> Result<Vec<String>> {
        if doc.is_empty() {
            return Ok(Vec::new());
        }
        let mut doc = self.load_or_create(doc)?;
        Ok(doc.get_heads().into_iter().map(|h| h.to_string()).collect())
    }

    fn get_changes(&self, doc: &[u8], since_heads: &[String]) -> Result<Vec<u8>> {
        if doc.is_empty() {
            return Ok(Vec::new());
        }
        if since_heads.is_empty() {
            return Ok(doc.to_vec());
        }

        let mut heads = Vec::with_capacity(since_heads.len());
        for h in since_heads {
            let hash: ChangeHash = h
                .parse()
                .map_err(|_| SyncError::InvalidArgument(format!("invalid change hash {h:?}")))?;
            heads.push(hash);
        }

        let mut loaded = self.load_or_create(doc)?;
        let changes = loaded.get_changes(&heads);

        let mut buf = Vec::new();
        for change in changes {
            let mut change = change.clone();
            let bytes = change.bytes();
            let len = bytes.len() as u32;
            buf.extend_from_slice(&len.to_be_bytes());
            buf.extend_from_slice(&bytes);
        }
        Ok(buf)
    }

    fn get_history(&self, doc: &[u8]) -> Result<Vec<Change>> {
        if doc.is_empty() {
            return Ok(Vec::new());
        }
        let mut loaded = self.load_or_create(doc)?;
        let changes = loaded.get_changes(&[]);
        let mut history: Vec<Change> = changes
            .into_iter()
            .map(|c| Change {
                hash: c.hash().to_string(),
                message: c.message().cloned().unwrap_or_default(),
                timestamp_us: c.timestamp(),
            })
            .collect();
        // get_changes has no ordering guarantee beyond "covers the deps";
        // sort to produce an oldest-to-newest log.
        history.sort_by_key(|c| c.timestamp_us);
        Ok(history)
    }

    fn name(&self) -> &'static str {
        "automerge"
    }
}
