//! Dual ledger: the facts/queries/plan record (`TaskLedger`) and the
//! iteration/progress tracker (`ProgressLedger`) that together give an
//! orchestrator run its persistent memory across EPCC steps.
//!
//! Facts are last-write-wins, queries/conclusions dedup on insert, and a
//! stagnation counter trips a replan once three iterations in a row make
//! no progress.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of consecutive non-progress iterations before a replan
/// is recommended.
pub const DEFAULT_MAX_STAGNATION: u32 = 3;

/// Facts, open questions, and the running plan for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLedger {
    pub task_id: String,
    pub goal: String,
    pub known_facts: HashMap<String, String>,
    pub pending_queries: Vec<String>,
    pub pending_conclusions: Vec<String>,
    pub initial_plan: Vec<String>,
    pub experience_hints: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskLedger {
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            goal: goal.into(),
            known_facts: HashMap::new(),
            pending_queries: Vec::new(),
            pending_conclusions: Vec::new(),
            initial_plan: Vec::new(),
            experience_hints: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Record or overwrite a fact. Last write wins — no versioning is kept.
    pub fn add_fact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.known_facts.insert(key.into(), value.into());
    }

    /// Raise an open question, deduped against already-pending queries.
    pub fn add_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        if !self.pending_queries.contains(&query) {
            self.pending_queries.push(query);
        }
    }

    /// Resolve a pending query: removes it from the queue and records the
    /// resolution as a fact under a `resolved:` prefix.
    pub fn resolve_query(&mut self, query: &str, resolution: impl Into<String>) {
        if let Some(pos) = self.pending_queries.iter().position(|q| q == query) {
            self.pending_queries.remove(pos);
        }
        self.add_fact(format!("resolved:{}", query), resolution);
    }

    pub fn add_conclusion(&mut self, conclusion: impl Into<String>) {
        let conclusion = conclusion.into();
        if !self.pending_conclusions.contains(&conclusion) {
            self.pending_conclusions.push(conclusion);
        }
    }

    pub fn set_plan(&mut self, plan: Vec<String>) {
        self.initial_plan = plan;
    }

    pub fn add_hint(&mut self, hint: impl Into<String>) {
        let hint = hint.into();
        if !self.experience_hints.contains(&hint) {
            self.experience_hints.push(hint);
        }
    }

    /// Deterministic multi-section text dump handed to agents as context.
    pub fn to_context(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Goal: {}\n\n", self.goal));

        if !self.known_facts.is_empty() {
            out.push_str("Known facts:\n");
            let mut keys: Vec<_> = self.known_facts.keys().collect();
            keys.sort();
            for key in keys {
                out.push_str(&format!("- {}: {}\n", key, self.known_facts[key]));
            }
            out.push('\n');
        }

        if !self.pending_queries.is_empty() {
            out.push_str("Open questions:\n");
            for query in &self.pending_queries {
                out.push_str(&format!("- {}\n", query));
            }
            out.push('\n');
        }

        if !self.pending_conclusions.is_empty() {
            out.push_str("Conclusions so far:\n");
            for conclusion in &self.pending_conclusions {
                out.push_str(&format!("- {}\n", conclusion));
            }
            out.push('\n');
        }

        if !self.initial_plan.is_empty() {
            out.push_str("Plan:\n");
            for (i, step) in self.initial_plan.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, step));
            }
            out.push('\n');
        }

        if !self.experience_hints.is_empty() {
            out.push_str("Hints from prior experience:\n");
            for hint in &self.experience_hints {
                out.push_str(&format!("- {}\n", hint));
            }
        }

        out
    }
}

/// Status recorded for a single iteration of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Progress,
    Stagnant,
    Blocked,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub status: IterationStatus,
    pub action: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Tracks whether a run is making progress across iterations and whether
/// it has fallen into a loop that warrants replanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressLedger {
    pub max_stagnation: u32,
    pub iterations: Vec<IterationRecord>,
    pub stagnation_count: u32,
    pub is_completed: bool,
}

impl Default for ProgressLedger {
    fn default() -> Self {
        Self {
            max_stagnation: DEFAULT_MAX_STAGNATION,
            iterations: Vec::new(),
            stagnation_count: 0,
            is_completed: false,
        }
    }
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_stagnation(max_stagnation: u32) -> Self {
        Self {
            max_stagnation,
            ..Self::default()
        }
    }

    /// Record one iteration's outcome. `progress == true` resets the
    /// stagnation counter; otherwise it increments.
    pub fn record_iteration(
        &mut self,
        progress: bool,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> IterationStatus {
        let status = if progress {
            self.stagnation_count = 0;
            IterationStatus::Progress
        } else {
            self.stagnation_count += 1;
            IterationStatus::Stagnant
        };

        self.iterations.push(IterationRecord {
            iteration: self.iterations.len() as u32 + 1,
            status,
            action: action.into(),
            result: result.into(),
            timestamp: Utc::now(),
        });

        status
    }

    /// Record an iteration that could not run at all — a persistence
    /// failure, a call timeout, or any other externally-surfaced error
    /// the caller must not silently swallow. Counts toward stagnation the
    /// same way a failed attempt does, since a blocked iteration made no
    /// progress either.
    pub fn record_blocked(&mut self, action: impl Into<String>, result: impl Into<String>) -> IterationStatus {
        self.stagnation_count += 1;
        self.iterations.push(IterationRecord {
            iteration: self.iterations.len() as u32 + 1,
            status: IterationStatus::Blocked,
            action: action.into(),
            result: result.into(),
            timestamp: Utc::now(),
        });
        IterationStatus::Blocked
    }

    pub fn should_replan(&self) -> bool {
        self.stagnation_count >= self.max_stagnation
    }

    pub fn reset_stagnation(&mut self) {
        self.stagnation_count = 0;
    }

    pub fn mark_completed(&mut self) {
        self.is_completed = true;
    }

    /// True if the last three iterations are all stagnant with an
    /// identical result, indicating the run is stuck repeating itself
    /// rather than merely failing to progress.
    pub fn detect_loop(&self) -> bool {
        if self.iterations.len() < 3 {
            return false;
        }
        let last_three = &self.iterations[self.iterations.len() - 3..];
        let all_stagnant = last_three.iter().all(|r| r.status == IterationStatus::Stagnant);
        let same_result = last_three.windows(2).all(|w| w[0].result == w[1].result);
        all_stagnant && same_result
    }

    /// Snapshot used by the orchestrator to decide whether to continue,
    /// replan, or heal.
    pub fn reflect(&self) -> ProgressReflection {
        ProgressReflection {
            task_completed: self.is_completed,
            in_loop: self.detect_loop(),
            stagnant: self.stagnation_count > 0,
            stagnation_count: self.stagnation_count,
            should_replan: self.should_replan(),
            total_iterations: self.iterations.len() as u32,
            last_action: self.iterations.last().map(|r| r.action.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReflection {
    pub task_completed: bool,
    pub in_loop: bool,
    pub stagnant: bool,
    pub stagnation_count: u32,
    pub should_replan: bool,
    pub total_iterations: u32,
    pub last_action: Option<String>,
}

/// Combined task/progress ledger passed around as a single unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualLedger {
    pub task: TaskLedger,
    pub progress: ProgressLedger,
}

impl DualLedger {
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            task: TaskLedger::new(task_id, goal),
            progress: ProgressLedger::new(),
        }
    }

    /// Full context handed to an agent: task ledger dump plus a progress
    /// summary line.
    pub fn get_full_context(&self) -> String {
        let mut out = self.task.to_context();
        let reflection = self.progress.reflect();
        out.push_str(&format!(
            "\nProgress: {} iterations, stagnation={}, in_loop={}\n",
            reflection.total_iterations, reflection.stagnation_count, reflection.in_loop
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_fact_is_last_write_wins() {
        let mut ledger = TaskLedger::new("t1", "goal");
        ledger.add_fact("x", "1");
        ledger.add_fact("x", "2");
        assert_eq!(ledger.known_facts.get("x"), Some(&"2".to_string()));
    }

    #[test]
    fn test_query_lifecycle() {
        let mut ledger = TaskLedger::new("t1", "goal");
        ledger.add_query("what is the deadline?");
        ledger.add_query("what is the deadline?");
        assert_eq!(ledger.pending_queries.len(), 1);

        ledger.resolve_query("what is the deadline?", "next Friday");
        assert!(ledger.pending_queries.is_empty());
        assert_eq!(
            ledger.known_facts.get("resolved:what is the deadline?"),
            Some(&"next Friday".to_string())
        );
    }

    #[test]
    fn test_progress_resets_stagnation() {
        let mut progress = ProgressLedger::new();
        progress.record_iteration(false, "try A", "no change");
        progress.record_iteration(false, "try B", "no change");
        assert_eq!(progress.stagnation_count, 2);

        progress.record_iteration(true, "try C", "made progress");
        assert_eq!(progress.stagnation_count, 0);
    }

    #[test]
    fn test_should_replan_after_max_stagnation() {
        let mut progress = ProgressLedger::with_max_stagnation(2);
        progress.record_iteration(false, "a", "x");
        assert!(!progress.should_replan());
        progress.record_iteration(false, "b", "x");
        assert!(progress.should_replan());
    }

    #[test]
    fn test_detect_loop_requires_identical_stagnant_results() {
        let mut progress = ProgressLedger::new();
        progress.record_iteration(false, "a", "same error");
        progress.record_iteration(false, "b", "same error");
        assert!(!progress.detect_loop(), "need three records to detect a loop");
        progress.record_iteration(false, "c", "same error");
        assert!(progress.detect_loop());
    }

    #[test]
    fn test_detect_loop_false_when_results_differ() {
        let mut progress = ProgressLedger::new();
        progress.record_iteration(false, "a", "error 1");
        progress.record_iteration(false, "b", "error 2");
        progress.record_iteration(false, "c", "error 3");
        assert!(!progress.detect_loop());
    }

    #[test]
    fn test_record_blocked_counts_toward_stagnation() {
        let mut progress = ProgressLedger::with_max_stagnation(2);
        let status = progress.record_blocked("save checkpoint", "store unavailable");
        assert_eq!(status, IterationStatus::Blocked);
        assert_eq!(progress.stagnation_count, 1);
        progress.record_blocked("save checkpoint", "store unavailable");
        assert!(progress.should_replan());
        assert_eq!(progress.iterations.last().unwrap().status, IterationStatus::Blocked);
    }

    #[test]
    fn test_dual_ledger_context_includes_progress() {
        let mut ledger = DualLedger::new("t1", "ship it");
        ledger.task.add_fact("owner", "alice");
        ledger.progress.record_iteration(true, "wrote code", "compiles");

        let context = ledger.get_full_context();
        assert!(context.contains("ship it"));
        assert!(context.contains("owner: alice"));
        assert!(context.contains("1 iterations"));
    }
}
