//! RocksDB-backed embedded checkpoint store.
//!
//! One column family holds checkpoint rows keyed by `(thread_id, step)`, a
//! second tracks the latest step per thread so `load` does not need a scan,
//! and a third persists the hub's event history for replay. Uses bincode
//! for checkpoints (typed, internal) and JSON for events (debuggable).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::checkpoint_store::{CheckpointStore, StoreError, StoreResult};
use super::schema::{self, ALL_CFS};
use super::types::Checkpoint;

fn rocks(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

/// RocksDB-backed persistent state store
pub struct StateStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl StateStore {
    /// Open or create a state store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors).map_err(rocks)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn put_bytes(&self, cf_name: &str, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes).map_err(rocks)?;
        Ok(())
    }

    fn get_bytes(&self, cf_name: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        db.get_cf(&cf, key.as_bytes()).map_err(rocks)
    }

    fn delete(&self, cf_name: &str, key: &str) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        db.delete_cf(&cf, key.as_bytes()).map_err(rocks)?;
        Ok(())
    }

    /// List all keys with a prefix in a column family
    fn list_keys(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut keys = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());

        for result in iter {
            let (key, _) = result.map_err(rocks)?;
            if let Ok(key_str) = String::from_utf8(key.to_vec()) {
                if key_str.starts_with(prefix) {
                    keys.push(key_str);
                } else {
                    break;
                }
            }
        }

        Ok(keys)
    }

    // =========================================================================
    // Checkpoint operations
    // =========================================================================

    fn save_checkpoint_sync(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        serde_json::to_vec(&checkpoint.state)
            .map_err(|e| StoreError::NonSerializableState(e.to_string()))?;

        let key = schema::keys::checkpoint(&checkpoint.thread_id, checkpoint.step);
        let bytes = bincode::serialize(checkpoint)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put_bytes(schema::CF_CHECKPOINTS, &key, bytes)?;

        let latest_key = schema::keys::checkpoint_latest(&checkpoint.thread_id);
        let current_latest = self.latest_step_sync(&checkpoint.thread_id)?;
        if current_latest.map(|s| checkpoint.step >= s).unwrap_or(true) {
            self.put_bytes(
                schema::CF_CHECKPOINT_LATEST,
                &latest_key,
                checkpoint.step.to_le_bytes().to_vec(),
            )?;
        }
        Ok(())
    }

    fn latest_step_sync(&self, thread_id: &str) -> StoreResult<Option<u64>> {
        let key = schema::keys::checkpoint_latest(thread_id);
        match self.get_bytes(schema::CF_CHECKPOINT_LATEST, &key)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(Some(u64::from_le_bytes(buf)))
            }
            _ => Ok(None),
        }
    }

    fn load_at_step_sync(&self, thread_id: &str, step: u64) -> StoreResult<Option<Checkpoint>> {
        let key = schema::keys::checkpoint(thread_id, step);
        match self.get_bytes(schema::CF_CHECKPOINTS, &key)? {
            Some(bytes) => {
                let cp = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(cp))
            }
            None => Ok(None),
        }
    }

    fn list_checkpoints_sync(&self, thread_id: &str) -> StoreResult<Vec<Checkpoint>> {
        let prefix = schema::keys::checkpoint_prefix(thread_id);
        let keys = self.list_keys(schema::CF_CHECKPOINTS, &prefix)?;
        let mut checkpoints = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.get_bytes(schema::CF_CHECKPOINTS, &key)? {
                let cp: Checkpoint = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                checkpoints.push(cp);
            }
        }
        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    fn delete_thread_sync(&self, thread_id: &str) -> StoreResult<()> {
        let prefix = schema::keys::checkpoint_prefix(thread_id);
        for key in self.list_keys(schema::CF_CHECKPOINTS, &prefix)? {
            self.delete(schema::CF_CHECKPOINTS, &key)?;
        }
        let latest_key = schema::keys::checkpoint_latest(thread_id);
        self.delete(schema::CF_CHECKPOINT_LATEST, &latest_key)?;
        Ok(())
    }

    // =========================================================================
    // Event operations (for replay)
    // =========================================================================

    /// Store an event (serialized as JSON for debuggability)
    pub fn put_event(
        &self,
        timestamp_nanos: i64,
        event_id: &str,
        event: &impl Serialize,
    ) -> StoreResult<()> {
        let key = schema::keys::event(timestamp_nanos, event_id);
        let bytes =
            serde_json::to_vec(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put_bytes(schema::CF_EVENTS, &key, bytes)
    }

    /// Get events in a time range
    pub fn get_events_range<T: DeserializeOwned>(
        &self,
        start_nanos: i64,
        end_nanos: i64,
    ) -> StoreResult<Vec<(i64, T)>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_EVENTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_EVENTS.to_string()))?;

        let start_key = schema::keys::event(start_nanos, "");
        let iter = db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(start_key.as_bytes(), rocksdb::Direction::Forward),
        );

        let mut events = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(rocks)?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;

            if let Some(ts) = schema::keys::parse_event_timestamp(&key_str) {
                if ts > end_nanos {
                    break;
                }
                let event: T = serde_json::from_slice(&value)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                events.push((ts, event));
            }
        }

        Ok(events)
    }

    /// Delete old events before a timestamp
    pub fn prune_events_before(&self, timestamp_nanos: i64) -> StoreResult<usize> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_EVENTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_EVENTS.to_string()))?;

        let start_key = schema::keys::event(0, "");
        let end_key = schema::keys::event(timestamp_nanos, "");

        let mut keys_to_delete = Vec::new();
        let iter = db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(start_key.as_bytes(), rocksdb::Direction::Forward),
        );

        for result in iter {
            let (key, _) = result.map_err(rocks)?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;

            if key_str >= end_key {
                break;
            }
            keys_to_delete.push(key.to_vec());
        }

        let count = keys_to_delete.len();
        for key in keys_to_delete {
            db.delete_cf(&cf, key).map_err(rocks)?;
        }

        Ok(count)
    }
}

/// Blanket `CheckpointStore` impl over the embedded RocksDB store.
///
/// The underlying RocksDB calls are synchronous; they run inline rather
/// than via `spawn_blocking`, consistent with calling this store directly
/// from async voting/arbitration code elsewhere in the pipeline.
#[async_trait]
impl CheckpointStore for StateStore {
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.save_checkpoint_sync(checkpoint)
    }

    async fn load(&self, thread_id: &str) -> StoreResult<Option<Checkpoint>> {
        match self.latest_step_sync(thread_id)? {
            Some(step) => self.load_at_step_sync(thread_id, step),
            None => Ok(None),
        }
    }

    async fn load_at_step(&self, thread_id: &str, step: u64) -> StoreResult<Option<Checkpoint>> {
        self.load_at_step_sync(thread_id, step)
    }

    async fn list_checkpoints(&self, thread_id: &str) -> StoreResult<Vec<Checkpoint>> {
        self.list_checkpoints_sync(thread_id)
    }

    async fn delete_thread(&self, thread_id: &str) -> StoreResult<()> {
        self.delete_thread_sync(thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn test_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn state(x: i64) -> HashMap<String, serde_json::Value> {
        let mut m = HashMap::new();
        m.insert("x".to_string(), serde_json::json!(x));
        m
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let (store, _dir) = test_store();
        let cp = Checkpoint::new("thread-1", 0, state(1));
        store.save(&cp).await.unwrap();

        let loaded = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.step, 0);
        assert_eq!(loaded.state, cp.state);
    }

    #[tokio::test]
    async fn test_load_returns_latest_step() {
        let (store, _dir) = test_store();
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 1, state(2))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 2, state(3))).await.unwrap();

        let latest = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
    }

    #[tokio::test]
    async fn test_load_at_step_is_exact() {
        let (store, _dir) = test_store();
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 1, state(2))).await.unwrap();

        let at0 = store.load_at_step("thread-1", 0).await.unwrap().unwrap();
        assert_eq!(at0.state, state(1));
    }

    #[tokio::test]
    async fn test_list_checkpoints_ordered_by_step() {
        let (store, _dir) = test_store();
        store.save(&Checkpoint::new("thread-1", 2, state(3))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 1, state(2))).await.unwrap();

        let all = store.list_checkpoints("thread-1").await.unwrap();
        let steps: Vec<u64> = all.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_thread_removes_everything() {
        let (store, _dir) = test_store();
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.delete_thread("thread-1").await.unwrap();

        assert!(store.load("thread-1").await.unwrap().is_none());
        assert!(store.list_checkpoints("thread-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let (store, _dir) = test_store();
        store.save(&Checkpoint::new("thread-a", 0, state(1))).await.unwrap();
        store.save(&Checkpoint::new("thread-b", 0, state(2))).await.unwrap();

        let a = store.load("thread-a").await.unwrap().unwrap();
        let b = store.load("thread-b").await.unwrap().unwrap();
        assert_eq!(a.state, state(1));
        assert_eq!(b.state, state(2));
    }
}
