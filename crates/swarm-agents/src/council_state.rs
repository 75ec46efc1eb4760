//! `CouncilState`: the orchestrator's owned record of one task moving
//! through the EPCC pipeline — plan, subtask progress, test results,
//! review comments, free-form metadata, and a flat log.
//!
//! A single owning struct accumulates everything about one run (plan,
//! results, log entries) as it moves through the pipeline, rather than
//! scattering that state across the individual step functions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state_machine::CouncilStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubtaskRecord {
    pub fn pending(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id: id.into(), description: description.into(), status: SubtaskStatus::Pending, result: None, error: None }
    }

    pub fn mark_done(&mut self, result: impl Into<String>) {
        self.status = SubtaskStatus::Done;
        self.result = Some(result.into());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SubtaskStatus::Failed;
        self.error = Some(error.into());
    }
}

/// The plan produced by the PLANNING state: a goal, its decomposition into
/// subtasks, and the risks the architect flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub subtasks: Vec<SubtaskRecord>,
    pub risks: Vec<String>,
}

impl Plan {
    /// Fallback plan used when the architect's structured response carries
    /// no usable suggestions: a single subtask equal to the raw task.
    pub fn single_subtask(task: &str) -> Self {
        Self {
            goal: task.to_string(),
            subtasks: vec![SubtaskRecord::pending("subtask-1", task)],
            risks: Vec::new(),
        }
    }

    pub fn all_subtasks_done(&self) -> bool {
        self.subtasks.iter().all(|s| matches!(s.status, SubtaskStatus::Done))
    }

    pub fn first_failed(&self) -> Option<&SubtaskRecord> {
        self.subtasks.iter().find(|s| matches!(s.status, SubtaskStatus::Failed))
    }

    pub fn first_pending_mut(&mut self) -> Option<&mut SubtaskRecord> {
        self.subtasks.iter_mut().find(|s| matches!(s.status, SubtaskStatus::Pending))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    pub raw_output: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub agent: String,
    pub vote: String,
    pub confidence: f64,
    pub blocking_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub status: CouncilStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the orchestrator knows about one task in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilState {
    pub task: String,
    pub status: CouncilStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    #[serde(default)]
    pub review_comments: Vec<ReviewComment>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl CouncilState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: CouncilStatus::Analyzing,
            plan: None,
            test_results: Vec::new(),
            review_comments: Vec::new(),
            metadata: HashMap::new(),
            log: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry { status: self.status, message: message.into(), timestamp: Utc::now() });
    }

    pub fn context_loaded(&self) -> bool {
        self.metadata.get("context_loaded").and_then(Value::as_bool).unwrap_or(false)
    }
}
