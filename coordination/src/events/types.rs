//! Closed event-type enum for the deliberation hub.
//!
//! Every event that crosses the hub is one of these variants; there is no
//! open-ended event kind. The variant set and wire tags follow the fixed
//! list of event families a deliberation run can emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ThreadId;

/// Unique identifier for events
pub type EventId = String;

/// All events a deliberation run can publish to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "task.created")]
    TaskCreated {
        thread_id: ThreadId,
        task_id: String,
        goal: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "task.updated")]
    TaskUpdated {
        thread_id: ThreadId,
        task_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        thread_id: ThreadId,
        task_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "task.failed")]
    TaskFailed {
        thread_id: ThreadId,
        task_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "info.fact_discovered")]
    FactDiscovered {
        thread_id: ThreadId,
        key: String,
        value: String,
        discovered_by: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "info.query_raised")]
    QueryRaised {
        thread_id: ThreadId,
        query: String,
        raised_by: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "info.query_resolved")]
    QueryResolved {
        thread_id: ThreadId,
        query: String,
        resolution: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "artifact.code_written")]
    CodeWritten {
        thread_id: ThreadId,
        files_changed: Vec<String>,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "artifact.test_passed")]
    TestPassed {
        thread_id: ThreadId,
        test_command: String,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "artifact.test_failed")]
    TestFailed {
        thread_id: ThreadId,
        test_command: String,
        failure_summary: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "handoff.initiated")]
    HandoffInitiated {
        thread_id: ThreadId,
        from_agent: String,
        to_agent: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "handoff.completed")]
    HandoffCompleted {
        thread_id: ThreadId,
        from_agent: String,
        to_agent: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "interrupt.raised")]
    InterruptRaised {
        thread_id: ThreadId,
        approval_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "interrupt.resumed")]
    InterruptResumed {
        thread_id: ThreadId,
        approval_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "system.heartbeat")]
    SystemHeartbeat {
        thread_id: ThreadId,
        status: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "system.error")]
    SystemError {
        thread_id: ThreadId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Timestamp carried by every event variant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TaskCreated { timestamp, .. } => *timestamp,
            Event::TaskUpdated { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::FactDiscovered { timestamp, .. } => *timestamp,
            Event::QueryRaised { timestamp, .. } => *timestamp,
            Event::QueryResolved { timestamp, .. } => *timestamp,
            Event::CodeWritten { timestamp, .. } => *timestamp,
            Event::TestPassed { timestamp, .. } => *timestamp,
            Event::TestFailed { timestamp, .. } => *timestamp,
            Event::HandoffInitiated { timestamp, .. } => *timestamp,
            Event::HandoffCompleted { timestamp, .. } => *timestamp,
            Event::InterruptRaised { timestamp, .. } => *timestamp,
            Event::InterruptResumed { timestamp, .. } => *timestamp,
            Event::SystemHeartbeat { timestamp, .. } => *timestamp,
            Event::SystemError { timestamp, .. } => *timestamp,
        }
    }

    /// Dotted wire tag, e.g. `"task.created"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "task.created",
            Event::TaskUpdated { .. } => "task.updated",
            Event::TaskCompleted { .. } => "task.completed",
            Event::TaskFailed { .. } => "task.failed",
            Event::FactDiscovered { .. } => "info.fact_discovered",
            Event::QueryRaised { .. } => "info.query_raised",
            Event::QueryResolved { .. } => "info.query_resolved",
            Event::CodeWritten { .. } => "artifact.code_written",
            Event::TestPassed { .. } => "artifact.test_passed",
            Event::TestFailed { .. } => "artifact.test_failed",
            Event::HandoffInitiated { .. } => "handoff.initiated",
            Event::HandoffCompleted { .. } => "handoff.completed",
            Event::InterruptRaised { .. } => "interrupt.raised",
            Event::InterruptResumed { .. } => "interrupt.resumed",
            Event::SystemHeartbeat { .. } => "system.heartbeat",
            Event::SystemError { .. } => "system.error",
        }
    }

    /// Thread this event belongs to; every variant is thread-scoped.
    pub fn thread_id(&self) -> &str {
        match self {
            Event::TaskCreated { thread_id, .. } => thread_id,
            Event::TaskUpdated { thread_id, .. } => thread_id,
            Event::TaskCompleted { thread_id, .. } => thread_id,
            Event::TaskFailed { thread_id, .. } => thread_id,
            Event::FactDiscovered { thread_id, .. } => thread_id,
            Event::QueryRaised { thread_id, .. } => thread_id,
            Event::QueryResolved { thread_id, .. } => thread_id,
            Event::CodeWritten { thread_id, .. } => thread_id,
            Event::TestPassed { thread_id, .. } => thread_id,
            Event::TestFailed { thread_id, .. } => thread_id,
            Event::HandoffInitiated { thread_id, .. } => thread_id,
            Event::HandoffCompleted { thread_id, .. } => thread_id,
            Event::InterruptRaised { thread_id, .. } => thread_id,
            Event::InterruptResumed { thread_id, .. } => thread_id,
            Event::SystemHeartbeat { thread_id, .. } => thread_id,
            Event::SystemError { thread_id, .. } => thread_id,
        }
    }

    /// True for the variants that feed the progress ledger
    /// (`CODE_WRITTEN`/`TEST_PASSED` count as progress, `TEST_FAILED` as
    /// stagnation, per the iteration tracker's projection rule).
    pub fn is_progress_signal(&self) -> bool {
        matches!(self, Event::CodeWritten { .. } | Event::TestPassed { .. })
    }

    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_uses_dotted_tag() {
        let event = Event::TaskCreated {
            thread_id: "thread-1".to_string(),
            task_id: "task-1".to_string(),
            goal: "ship the feature".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"task.created\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "task.created");
    }

    #[test]
    fn test_event_accessors() {
        let event = Event::TestFailed {
            thread_id: "thread-1".to_string(),
            test_command: "cargo test".to_string(),
            failure_summary: "2 failed".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.thread_id(), "thread-1");
        assert_eq!(event.event_type(), "artifact.test_failed");
        assert!(!event.is_progress_signal());
    }

    #[test]
    fn test_progress_signal_classification() {
        let code = Event::CodeWritten {
            thread_id: "t".to_string(),
            files_changed: vec!["src/lib.rs".to_string()],
            summary: "added parser".to_string(),
            timestamp: Utc::now(),
        };
        let test_pass = Event::TestPassed {
            thread_id: "t".to_string(),
            test_command: "cargo test".to_string(),
            summary: "all green".to_string(),
            timestamp: Utc::now(),
        };
        assert!(code.is_progress_signal());
        assert!(test_pass.is_progress_signal());
    }
}
