//! Persistence layer: checkpoint storage and the network key-value realization.
//!
//! Two interchangeable realizations of `CheckpointStore` are provided: an
//! embedded RocksDB store (`store`, behind the `heavy-state` feature) and a
//! network key-value store built on the `KvBackend` trait (`kv`), along
//! with a distributed lock over the same trait. The orchestrator depends
//! only on `CheckpointStore`, so either can back a given run.

pub mod checkpoint_store;
pub mod kv;
pub mod schema;
pub mod types;

#[cfg(feature = "heavy-state")]
pub mod store;

pub use checkpoint_store::{CheckpointStore, SharedCheckpointStore, StoreError, StoreResult};
pub use kv::{DistributedLock, InMemoryKvBackend, KvBackend, KvCheckpointStore, KvError, LockError};
pub use types::{Checkpoint, SessionId, TaskId, ThreadId};

#[cfg(feature = "heavy-state")]
pub use store::{SharedStateStore, StateStore};
