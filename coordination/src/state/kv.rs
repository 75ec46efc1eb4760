//! Network key-value realization of checkpoint storage plus a distributed
//! lock built on the same primitive.
//!
//! Keyed as `council:checkpoints:{thread_id}:{step}` and
//! `council:latest:{thread_id}`, expressed against an in-process
//! `KvBackend` trait rather than a concrete network client. Swapping in a
//! real network KV store means implementing `KvBackend`, not touching the
//! orchestrator or this module's logic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::checkpoint_store::{CheckpointStore, StoreError, StoreResult};
use super::types::Checkpoint;

fn kv_err(e: KvError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Minimal key-value operations a checkpoint store and distributed lock
/// need from a network store. `set_nx` is "set if not exists" (Redis SETNX
/// semantics), used both for checkpoint writes and lock acquisition.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;
    /// Set only if the key is absent; returns true if the set happened.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> Result<bool, KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
    /// List every key with the given prefix.
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<std::time::Instant>,
}

/// In-process `KvBackend` for tests and single-process deployments.
/// Expiring entries are reaped lazily on access.
#[derive(Default, Clone)]
pub struct InMemoryKvBackend {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry
            .expires_at
            .map(|at| at > std::time::Instant::now())
            .unwrap_or(true)
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut data = self.data.lock().await;
        if let Some(entry) = data.get(key) {
            if Self::is_live(entry) {
                return Ok(Some(entry.value.clone()));
            }
            data.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
        let mut data = self.data.lock().await;
        data.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> Result<bool, KvError> {
        let mut data = self.data.lock().await;
        if let Some(entry) = data.get(key) {
            if Self::is_live(entry) {
                return Ok(false);
            }
        }
        let expires_at = ttl_secs.map(|s| std::time::Instant::now() + std::time::Duration::from_secs(s));
        data.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut data = self.data.lock().await;
        data.remove(key);
        Ok(())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let data = self.data.lock().await;
        Ok(data
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && Self::is_live(v))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

fn checkpoint_key(thread_id: &str, step: u64) -> String {
    format!("council:checkpoints:{}:{}", thread_id, step)
}

fn latest_key(thread_id: &str) -> String {
    format!("council:latest:{}", thread_id)
}

/// `CheckpointStore` realized over any `KvBackend`.
pub struct KvCheckpointStore<B: KvBackend> {
    backend: B,
}

impl<B: KvBackend> KvCheckpointStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: KvBackend> CheckpointStore for KvCheckpointStore<B> {
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = checkpoint_key(&checkpoint.thread_id, checkpoint.step);
        self.backend
            .set(&key, bytes.clone())
            .await
            .map_err(kv_err)?;
        self.backend
            .set(&latest_key(&checkpoint.thread_id), checkpoint.step.to_string().into_bytes())
            .await
            .map_err(kv_err)?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> StoreResult<Option<Checkpoint>> {
        let step_bytes = self
            .backend
            .get(&latest_key(thread_id))
            .await
            .map_err(kv_err)?;
        let Some(step_bytes) = step_bytes else {
            return Ok(None);
        };
        let step: u64 = String::from_utf8_lossy(&step_bytes)
            .parse()
            .map_err(|_| StoreError::Deserialization("bad latest step marker".into()))?;
        self.load_at_step(thread_id, step).await
    }

    async fn load_at_step(&self, thread_id: &str, step: u64) -> StoreResult<Option<Checkpoint>> {
        let bytes = self
            .backend
            .get(&checkpoint_key(thread_id, step))
            .await
            .map_err(kv_err)?;
        match bytes {
            Some(bytes) => {
                let cp = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(cp))
            }
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self, thread_id: &str) -> StoreResult<Vec<Checkpoint>> {
        let prefix = format!("council:checkpoints:{}:", thread_id);
        let keys = self
            .backend
            .list_keys_with_prefix(&prefix)
            .await
            .map_err(kv_err)?;
        let mut checkpoints = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self
                .backend
                .get(&key)
                .await
                .map_err(kv_err)?
            {
                let cp: Checkpoint = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                checkpoints.push(cp);
            }
        }
        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    async fn delete_thread(&self, thread_id: &str) -> StoreResult<()> {
        let prefix = format!("council:checkpoints:{}:", thread_id);
        let keys = self
            .backend
            .list_keys_with_prefix(&prefix)
            .await
            .map_err(kv_err)?;
        for key in keys {
            self.backend
                .delete(&key)
                .await
                .map_err(kv_err)?;
        }
        self.backend
            .delete(&latest_key(thread_id))
            .await
            .map_err(kv_err)?;
        Ok(())
    }
}

// =============================================================================
// Distributed lock
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock already held")]
    AlreadyHeld,
    #[error("lock not held by this token")]
    NotHeld,
    #[error("backend error: {0}")]
    Backend(#[from] KvError),
    #[error("locked task was cancelled before completing: {0}")]
    Cancelled(String),
}

/// Mutual-exclusion lock over a `KvBackend`, using set-if-absent with a
/// random token and a TTL so a crashed holder does not wedge the lock
/// forever.
pub struct DistributedLock<B: KvBackend> {
    backend: Arc<B>,
}

impl<B: KvBackend> DistributedLock<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    fn lock_key(key: &str) -> String {
        format!("council:lock:{}", key)
    }

    /// Attempt to acquire `key` for `ttl_secs`. Returns a token to pass
    /// to `release`/`extend` on success.
    pub async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<Option<String>, LockError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .backend
            .set_nx(&Self::lock_key(key), token.clone().into_bytes(), Some(ttl_secs))
            .await?;
        Ok(if acquired { Some(token) } else { None })
    }

    /// Release `key` if `token` is still the current holder.
    pub async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let lock_key = Self::lock_key(key);
        let current = self.backend.get(&lock_key).await?;
        match current {
            Some(bytes) if bytes == token.as_bytes() => {
                self.backend.delete(&lock_key).await?;
                Ok(())
            }
            _ => Err(LockError::NotHeld),
        }
    }

    /// Re-acquire `key` for another `ttl_secs`, failing if `token` is no
    /// longer the current holder.
    pub async fn extend(&self, key: &str, token: &str, ttl_secs: u64) -> Result<(), LockError> {
        let lock_key = Self::lock_key(key);
        let current = self.backend.get(&lock_key).await?;
        match current {
            Some(bytes) if bytes == token.as_bytes() => {
                // set_nx would refuse to overwrite our own still-live key, so
                // extend writes directly; TTL refresh needs a backend that
                // tracks expiry on plain `set`, which InMemoryKvBackend does not.
                self.backend.set(&lock_key, token.as_bytes().to_vec()).await?;
                Ok(())
            }
            _ => Err(LockError::NotHeld),
        }
    }

    /// Acquire `key`, run `f` on a spawned task, and release on the way
    /// out regardless of whether `f` succeeds, panics, or is cancelled —
    /// running it on a task is what makes release-on-panic possible
    /// without async `Drop`. A panic inside `f` is resumed on this task
    /// after the lock is released, so it still propagates to the caller
    /// exactly as an inline panic would.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, ttl_secs: u64, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let token = self
            .acquire(key, ttl_secs)
            .await?
            .ok_or(LockError::AlreadyHeld)?;

        let join_result = tokio::spawn(f()).await;
        self.release(key, &token).await.ok();

        match join_result {
            Ok(value) => Ok(value),
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(join_err) => Err(LockError::Cancelled(join_err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn state(x: i64) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("x".to_string(), serde_json::json!(x));
        m
    }

    #[tokio::test]
    async fn test_kv_store_roundtrip() {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        let cp = Checkpoint::new("thread-1", 0, state(1));
        store.save(&cp).await.unwrap();

        let loaded = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, state(1));
    }

    #[tokio::test]
    async fn test_kv_store_latest_tracks_highest_step() {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.save(&Checkpoint::new("thread-1", 1, state(2))).await.unwrap();

        let latest = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(latest.step, 1);
    }

    #[tokio::test]
    async fn test_kv_store_delete_thread() {
        let store = KvCheckpointStore::new(InMemoryKvBackend::new());
        store.save(&Checkpoint::new("thread-1", 0, state(1))).await.unwrap();
        store.delete_thread("thread-1").await.unwrap();

        assert!(store.load("thread-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let lock = DistributedLock::new(backend);

        let token = lock.acquire("res-1", 30).await.unwrap();
        assert!(token.is_some());

        let second = lock.acquire("res-1", 30).await.unwrap();
        assert!(second.is_none(), "second acquire should fail while first holds the lock");

        lock.release("res-1", &token.unwrap()).await.unwrap();
        let third = lock.acquire("res-1", 30).await.unwrap();
        assert!(third.is_some(), "lock should be acquirable again after release");
    }

    #[tokio::test]
    async fn test_lock_release_wrong_token_fails() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let lock = DistributedLock::new(backend);

        lock.acquire("res-1", 30).await.unwrap();
        let result = lock.release("res-1", "not-the-real-token").await;
        assert!(matches!(result, Err(LockError::NotHeld)));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_completion() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let lock = DistributedLock::new(backend);

        lock.with_lock("res-1", 30, || async { 42 }).await.unwrap();

        let token = lock.acquire("res-1", 30).await.unwrap();
        assert!(token.is_some(), "lock must be released after with_lock completes");
    }

    #[tokio::test]
    async fn test_with_lock_releases_when_the_closure_panics() {
        let backend = Arc::new(InMemoryKvBackend::new());
        let lock = Arc::new(DistributedLock::new(backend));

        // Run the whole call on its own task so the resumed panic inside
        // `with_lock` doesn't take down the test's own task.
        let lock_for_task = lock.clone();
        let handle = tokio::spawn(async move { lock_for_task.with_lock("res-1", 30, || async { panic!("boom") }).await });
        let result = handle.await;
        assert!(result.is_err(), "the panic should still propagate to the caller");

        let token = lock.acquire("res-1", 30).await.unwrap();
        assert!(token.is_some(), "lock must be released even when the held closure panics");
    }
}
