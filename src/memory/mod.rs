//! Namespaced key/value memory store shared across the fleet.
//!
//! Reads observe the most recent completed write per key (linearizable per
//! key); queries within a partition are snapshot-consistent. TTL expiry is
//! lazy: expired entries are filtered out on read but may still occupy the
//! map until [`MemoryStore::compact`] runs.

#[cfg(feature = "persistent-memory")]
pub mod sled_store;


use crate::error::{FleetError, Result};
use crate::models::MemoryEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const EVENTS_PARTITION: &str = "events";
pub const SHARED_PARTITION: &str = "shared";

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Upserts `key` in `partition`, writing the writer identity and a
    /// fresh monotonic version. Returns the new version.
    async fn store(
        &self,
        partition: &str,
        key: &str,
        value: serde_json::Value,
        ttl_secs: Option<u64>,
        writer: &str,
    ) -> Result<u64>;

    /// Returns the entry, or `None` if absent or expired.
    async fn retrieve(&self, partition: &str, key: &str) -> Result<Option<MemoryEntry>>;

    /// Returns all non-expired entries in `partition` whose key matches
    /// `glob_pattern`. Order is unspecified.
    async fn query(&self, partition: &str, glob_pattern: &str) -> Result<Vec<MemoryEntry>>;

    async fn delete(&self, partition: &str, key: &str) -> Result<()>;

    /// Writes under the reserved `shared` partition with a key prefixed by
    /// `owner_kind`, readable by any agent of that kind or its declared
    /// collaborators (access control is the coordinator's concern; the
    /// store only enforces the naming convention).
    async fn store_shared(
        &self,
        owner_kind: &str,
        key: &str,
        value: serde_json::Value,
        writer: &str,
    ) -> Result<u64> {
        let full_key = format!("{owner_kind}/{key}");
        self.store(SHARED_PARTITION, &full_key, value, None, writer).await
    }

    /// Appends to the append-only `events` partition log.
    async fn store_event(&self, event: &crate::models::Event) -> Result<u64> {
        let value = serde_json::to_value(event).map_err(FleetError::Serialization)?;
        let key = format!("{:020}-{}", event.sequence, uuid::Uuid::new_v4());
        self.store(EVENTS_PARTITION, &key, value, None, &event.source).await
    }

    /// Drops expired entries from the backing store. Optional for
    /// correctness (lazy filtering on read already hides them) but keeps
    /// memory bounded over time.
    async fn compact(&self) -> Result<usize>;
}

struct Partition {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

/// Default, in-process [`MemoryStore`] implementation. Partitions are
/// independently locked; an outer lock only guards partition
/// creation/lookup, which is itself a cheap, uncontended operation once
/// partitions exist.
pub struct InMemoryStore {
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
    version_counter: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            version_counter: AtomicU64::new(0),
        }
    }

    async fn partition(&self, name: &str) -> Arc<Partition> {
        if let Some(p) = self.partitions.read().await.get(name) {
            return p.clone();
        }
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Partition {
                    entries: RwLock::new(HashMap::new()),
                })
            })
            .clone()
    }

    fn next_version(&self) -> u64 {
        self.version_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_expired(entry: &MemoryEntry, now: chrono::DateTime<chrono::Utc>) -> bool {
        entry.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(
        &self,
        partition: &str,
        key: &str,
        value: serde_json::Value,
        ttl_secs: Option<u64>,
        writer: &str,
    ) -> Result<u64> {
        let part = self.partition(partition).await;
        let version = self.next_version();
        let now = chrono::Utc::now();
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
        part.entries.write().await.insert(key.to_string(), entry);
        Ok(version)
    }

    async fn retrieve(&self, partition: &str, key: &str) -> Result<Option<MemoryEntry>> {
        let part = self.partition(partition).await;
        let now = chrono::Utc::now();
        let entries = part.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !Self::is_expired(e, now))
            .cloned())
    }

    async fn query(&self, partition: &str, glob_pattern: &str) -> Result<Vec<MemoryEntry>> {
        let part = self.partition(partition).await;
        let now = chrono::Utc::now();
        let entries = part.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| !Self::is_expired(e, now))
            .filter(|e| glob_match::glob_match(glob_pattern, &e.key))
            .cloned()
            .collect())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<()> {
        let part = self.partition(partition).await;
        part.entries.write().await.remove(key);
        Ok(())
    }

    async fn compact(&self) -> Result<usize> {
        let now = chrono::Utc::now();
        let partitions = self.partitions.read().await;
        let mut removed = 0;
        for part in partitions.values() {
            let mut entries = part.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| !Self::is_expired(e, now));
            removed += before - entries.len();
        }
        Ok(removed)
    }
}
