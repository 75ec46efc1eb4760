//! Column family definitions for the embedded RocksDB checkpoint store

/// Column family for checkpoint rows, keyed by (thread_id, step)
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column family mapping thread_id -> latest step
pub const CF_CHECKPOINT_LATEST: &str = "checkpoint_latest";

/// Column family for the hub's replayable event history
pub const CF_EVENTS: &str = "events";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_CHECKPOINTS, CF_CHECKPOINT_LATEST, CF_EVENTS];

/// Key prefixes for compound keys
pub mod keys {
    /// Create a checkpoint key; zero-padded step keeps lexicographic order
    /// equal to numeric order, matching the event key trick below.
    pub fn checkpoint(thread_id: &str, step: u64) -> String {
        format!("ckpt:{}:{:020}", thread_id, step)
    }

    /// Prefix matching every checkpoint for a thread
    pub fn checkpoint_prefix(thread_id: &str) -> String {
        format!("ckpt:{}:", thread_id)
    }

    /// Create a latest-step marker key
    pub fn checkpoint_latest(thread_id: &str) -> String {
        format!("latest:{}", thread_id)
    }

    /// Parse the step out of a checkpoint key
    pub fn parse_checkpoint_step(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }

    /// Create an event key (timestamp-based for ordering)
    pub fn event(timestamp_nanos: i64, event_id: &str) -> String {
        format!("evt:{:020}:{}", timestamp_nanos, event_id)
    }

    /// Parse event timestamp from key
    pub fn parse_event_timestamp(key: &str) -> Option<i64> {
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 2 && parts[0] == "evt" {
            parts[1].parse().ok()
        } else {
            None
        }
    }
}
