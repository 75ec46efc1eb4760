//! Core types persisted by the checkpoint store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a deliberation session
pub type SessionId = String;

/// Unique identifier for a task within a session
pub type TaskId = String;

/// Identifier for a persisted line of execution (one orchestrator run).
pub type ThreadId = String;

/// A named, step-indexed snapshot of orchestrator state.
///
/// Per `thread_id`, `step` is monotonically non-decreasing; the store
/// additionally exposes a *latest* checkpoint per thread for fast resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub step: u64,
    pub state: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<ThreadId>, step: u64, state: HashMap<String, serde_json::Value>) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut state = HashMap::new();
        state.insert("x".to_string(), serde_json::json!(1));
        let cp = Checkpoint::new("thread-1", 3, state);
        let json = cp.to_json().unwrap();
        let back = Checkpoint::from_json(&json).unwrap();
        assert_eq!(back.thread_id, "thread-1");
        assert_eq!(back.step, 3);
    }
}
