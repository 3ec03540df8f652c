//! Presence tracker collaborator. Grounded on
//! `internal/presence/manager.go`: `workspace_id -> user_id -> User`,
//! translated from a single `RwLock` over a nested `HashMap` to a
//! `DashMap` of `DashMap`s so unrelated workspaces never contend.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: String,
    pub status: String,
}

#[derive(Default)]
pub struct PresenceManager {
    workspaces: DashMap<String, DashMap<String, PresenceEntry>>,
}

impl PresenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, workspace_id: &str, entry: PresenceEntry) {
        self.workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .insert(entry.user_id.clone(), entry);
    }

    pub fn remove_user(&self, workspace_id: &str, user_id: &str) {
        if let Some(users) = self.workspaces.get(workspace_id) {
            users.remove(user_id);
            let empty = users.is_empty();
            drop(users);
            if empty {
                self.workspaces.remove(workspace_id);
            }
        }
    }

    pub fn get_users(&self, workspace_id: &str) -> Vec<PresenceEntry> {
        self.workspaces
            .get(workspace_id)
            .map(|users| users.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let mgr = PresenceManager::new();
        mgr.add_user(
            "ws1",
            PresenceEntry {
                user_id: "u1".into(),
                status: "online".into(),
            },
        );
        let users = mgr.get_users("ws1");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "u1");
    }

    #[test]
    fn remove_cleans_up_empty_workspace() {
        let mgr = PresenceManager::new();
        mgr.add_user(
            "ws1",
            PresenceEntry {
                user_id: "u1".into(),
                status: "online".into(),
            },
        );
        mgr.remove_user("ws1", "u1");
        assert!(mgr.get_users("ws1").is_empty());
    }

    #[test]
    fn workspaces_are_independent() {
        let mgr = PresenceManager::new();
        mgr.add_user(
            "ws1",
            PresenceEntry {
                user_id: "u1".into(),
                status: "online".into(),
            },
        );
        mgr.add_user(
            "ws2",
            PresenceEntry {
                user_id: "u2".into(),
                status: "online".into(),
            },
        );
        assert_eq!(mgr.get_users("ws1").len(), 1);
        assert_eq!(mgr.get_users("ws2").len(), 1);
    }
}
