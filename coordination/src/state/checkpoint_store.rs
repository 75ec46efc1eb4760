//! `CheckpointStore` trait and its error type, shared by both the embedded
//! RocksDB realization (`store`, behind `heavy-state`) and the network
//! key-value realization (`kv`), so the orchestrator can depend on the
//! trait alone regardless of which feature flags are enabled.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::Checkpoint;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("checkpoint state is not JSON-serializable: {0}")]
    NonSerializableState(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract checkpoint store. The orchestrator in `swarm-agents` is written
/// against this trait so persistence can be swapped between the embedded
/// store and the network key-value store without touching orchestrator
/// logic.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn initialize(&self) -> StoreResult<()>;
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()>;
    async fn load(&self, thread_id: &str) -> StoreResult<Option<Checkpoint>>;
    async fn load_at_step(&self, thread_id: &str, step: u64) -> StoreResult<Option<Checkpoint>>;
    async fn list_checkpoints(&self, thread_id: &str) -> StoreResult<Vec<Checkpoint>>;
    async fn delete_thread(&self, thread_id: &str) -> StoreResult<()>;
}

/// Shared handle to any checkpoint store realization.
pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;
