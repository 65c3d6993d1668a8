//! `sled`-backed [`MemoryStore`] for deployments that need entries to
//! survive a restart. Not wired in by default; opt in with the
//! `persistent-memory` feature and construct explicitly.

use super::MemoryStore;
use crate::error::{FleetError, Result};
use crate::models::MemoryEntry;
use async_trait::async_trait;

/// Each partition is a sled tree; keys are stored as-is within it.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| FleetError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn tree(&self, partition: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(partition)
            .map_err(|e| FleetError::Storage(e.to_string()))
    }

    fn is_expired(entry: &MemoryEntry, now: chrono::DateTime<chrono::Utc>) -> bool {
        entry.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[async_trait]
impl MemoryStore for SledStore {
    async fn store(
        &self,
        partition: &str,
        key: &str,
        value: serde_json::Value,
        ttl_secs: Option<u64>,
        writer: &str,
    ) -> Result<u64> {
        let tree = self.tree(partition)?;
        let now = chrono::Utc::now();
        let version = self.db.generate_id().map_err(|e| FleetError::Storage(e.to_string()))?;
        let entry = MemoryEntry {
            key: key.to_string(),
            partition: partition.to_string(),
            ttl_secs,
            value,
            writer: writer.to_string(),
            created_at: now,
            version,
            expires_at: ttl_secs.map(|secs| now + chrono::Duration::seconds(secs as i64)),
        };
        let bytes = serde_json::to_vec(&entry).map_err(FleetError::Serialization)?;
        tree.insert(key.as_bytes(), bytes)
            .map_err(|e| FleetError::Storage(e.to_string()))?;
        Ok(version)
    }

    async fn retrieve(&self, partition: &str, key: &str) -> Result<Option<MemoryEntry>> {
        let tree = self.tree(partition)?;
        let now = chrono::Utc::now();
        let Some(bytes) = tree.get(key.as_bytes()).map_err(|e| FleetError::Storage(e.to_string()))? else {
            return Ok(None);
        };
        let entry: MemoryEntry = serde_json::from_slice(&bytes).map_err(FleetError::Serialization)?;
        if Self::is_expired(&entry, now) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn query(&self, partition: &str, glob_pattern: &str) -> Result<Vec<MemoryEntry>> {
        let tree = self.tree(partition)?;
        let now = chrono::Utc::now();
        let mut matched = Vec::new();
        for item in tree.iter() {
            let (key_bytes, value_bytes) = item.map_err(|e| FleetError::Storage(e.to_string()))?;
            let key = String::from_utf8_lossy(&key_bytes);
            if !glob_match::glob_match(glob_pattern, &key) {
                continue;
            }
            let entry: MemoryEntry = serde_json::from_slice(&value_bytes).map_err(FleetError::Serialization)?;
            if !Self::is_expired(&entry, now) {
                matched.push(entry);
            }
        }
        Ok(matched)
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<()> {
        let tree = self.tree(partition)?;
        tree.remove(key.as_bytes())
            .map_err(|e| FleetError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn compact(&self) -> Result<usize> {
        let now = chrono::Utc::now();
        let mut removed = 0;
        for tree_name in self.db.tree_names() {
            let tree = self
                .db
                .open_tree(&tree_name)
                .map_err(|e| FleetError::Storage(e.to_string()))?;
            for item in tree.iter() {
                let (key_bytes, value_bytes) = item.map_err(|e| FleetError::Storage(e.to_string()))?;
                let entry: MemoryEntry = match serde_json::from_slice(&value_bytes) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                if Self::is_expired(&entry, now) {
                    tree.remove(&key_bytes).map_err(|e| FleetError::Storage(e.to_string()))?;
                    removed += 1;
                }
            }
        }
        self.db.flush_async().await.map_err(|e| FleetError::Storage(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> SledStore {
        let dir = tempfile::tempdir().unwrap();
        SledStore::open(dir.path().join("fleet.sled")).unwrap()
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let store = temp_store();
        store.store("p", "k", json!({"a": 1}), None, "w").await.unwrap();
        let entry = store.retrieve("p", "k").await.unwrap().unwrap();
        assert_eq!(entry.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn expired_entries_are_hidden() {
        let store = temp_store();
        store.store("p", "k", json!(1), Some(0), "w").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(store.retrieve("p", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_matches_glob_across_persisted_entries() {
        let store = temp_store();
        store.store("p", "security/a", json!(1), None, "w").await.unwrap();
        store.store("p", "coverage/b", json!(2), None, "w").await.unwrap();
        let matched = store.query("p", "security/*").await.unwrap();
        assert_eq!(matched.len(), 1);
    }
}
