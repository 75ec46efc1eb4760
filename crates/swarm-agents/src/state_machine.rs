//! Orchestrator State Machine — explicit states and legal transition guards
//! for the EPCC pipeline (Explore → Analyze → Plan → Code → Test → Heal →
//! Review).
//!
//! An explicit `is_legal_transition` free function plus a `StateMachine`
//! struct with `advance`/`fail`, a transition history, and
//! `tracing::debug!` logging on every move.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The set of orchestrator states driving one task through the EPCC
/// pipeline; this is `CouncilState.status`'s type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouncilStatus {
    /// Classifying the task (first visit: decides whether EXPLORING is
    /// needed; second visit, after EXPLORING: produces `task_type` /
    /// `recommended_model`).
    Analyzing,
    /// Loading read-only context documents into a rolling-context buffer.
    Exploring,
    /// Calling the architect's `think_structured` to build a `Plan`.
    Planning,
    /// Dispatching plan subtasks to the coder agent.
    Coding,
    /// Running the configured test command once.
    Testing,
    /// Bounded self-healing retry loop after a failing test run.
    Healing,
    /// Collecting structured votes and resolving them via Wald consensus.
    Reviewing,
    /// Task resolved successfully — terminal state.
    Completed,
    /// Stuck, rejected, or budget exhausted — terminal state.
    Failed,
    /// Escalated to a human and awaiting resolution — terminal state (a
    /// resumed task starts a fresh run rather than re-entering this one).
    HumanRequired,
}

impl CouncilStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::HumanRequired)
    }
}

impl fmt::Display for CouncilStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyzing => write!(f, "ANALYZING"),
            Self::Exploring => write!(f, "EXPLORING"),
            Self::Planning => write!(f, "PLANNING"),
            Self::Coding => write!(f, "CODING"),
            Self::Testing => write!(f, "TESTING"),
            Self::Healing => write!(f, "HEALING"),
            Self::Reviewing => write!(f, "REVIEWING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::HumanRequired => write!(f, "HUMAN_REQUIRED"),
        }
    }
}

/// Legal transitions between orchestrator states, per spec.md §4.5:
/// ```text
/// ANALYZING → EXPLORING → ANALYZING → PLANNING → CODING → TESTING
/// TESTING → REVIEWING         (tests passed)
/// TESTING → HEALING           (tests failed)
/// HEALING → REVIEWING         (always after bounded healing loop)
/// REVIEWING → COMPLETED       (consensus = AUTO_COMMIT)
/// REVIEWING → FAILED          (consensus = REJECT)
/// REVIEWING → HUMAN_REQUIRED  (consensus = HOLD_FOR_HUMAN)
/// Any state → FAILED          (unhandled error)
/// ```
fn is_legal_transition(from: CouncilStatus, to: CouncilStatus) -> bool {
    use CouncilStatus::*;

    // Any non-terminal state can transition to Failed or HumanRequired on
    // an unhandled error / a mid-pipeline interrupt.
    if (to == Failed || to == HumanRequired) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Analyzing, Exploring)
            | (Exploring, Analyzing)
            | (Analyzing, Planning)
            | (Planning, Coding)
            | (Coding, Testing)
            | (Testing, Reviewing)
            | (Testing, Healing)
            | (Healing, Reviewing)
            | (Reviewing, Completed)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CouncilStatus,
    pub to: CouncilStatus,
    pub iteration: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: CouncilStatus,
    pub to: CouncilStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The orchestrator state machine: tracks the current state, enforces
/// legal transitions, and keeps a complete log for replay and diagnostics.
#[derive(Debug)]
pub struct StateMachine {
    current: CouncilStatus,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self { current: CouncilStatus::Analyzing, iteration: 0, created_at: Instant::now(), transitions: Vec::new() }
    }

    pub fn current(&self) -> CouncilStatus {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to `to`. Returns `Err(IllegalTransition)` without
    /// mutating state if the edge isn't in the table above.
    pub fn advance(&mut self, to: CouncilStatus, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition { from: self.current, to });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, iteration = self.iteration, "state transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state. Always legal.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(CouncilStatus::Failed, Some(reason))
    }

    /// Transition to `HumanRequired` from any non-terminal state. Always
    /// legal — used when the governance gateway raises a `HumanInterrupt`.
    pub fn require_human(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(CouncilStatus::HumanRequired, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} -> {} ({}ms, {} transitions)",
            CouncilStatus::Analyzing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" -> ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Per-state timeout and iteration budgets
// ---------------------------------------------------------------------------

/// Why a state was cancelled (deterministic reason codes), per
/// SPEC_FULL.md §4.5's expanded timeout/cancellation note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    Timeout { state: CouncilStatus, elapsed_ms: u64, limit_ms: u64 },
    BudgetExhausted { state: CouncilStatus, used: u32, limit: u32 },
    GlobalBudgetExhausted { total_iterations: u32, limit: u32 },
    External { reason: String },
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { state, elapsed_ms, limit_ms } => write!(f, "timeout in {state}: {elapsed_ms}ms > {limit_ms}ms limit"),
            Self::BudgetExhausted { state, used, limit } => write!(f, "budget exhausted in {state}: {used}/{limit} iterations"),
            Self::GlobalBudgetExhausted { total_iterations, limit } => {
                write!(f, "global budget exhausted: {total_iterations}/{limit} iterations")
            }
            Self::External { reason } => write!(f, "external cancellation: {reason}"),
        }
    }
}

/// Budget configuration for a single state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBudget {
    pub timeout_ms: Option<u64>,
    pub max_iterations: Option<u32>,
}

impl StateBudget {
    pub fn timeout_only(timeout: Duration) -> Self {
        Self { timeout_ms: Some(timeout.as_millis() as u64), max_iterations: None }
    }

    pub fn unlimited() -> Self {
        Self { timeout_ms: None, max_iterations: None }
    }
}

/// Per-state budget configuration for the state machine. Every LLM and
/// test-run call made while in a given state is bounded by its timeout
/// (spec.md §5's "every LLM and test-run call is bounded by a timeout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub budgets: HashMap<CouncilStatus, StateBudget>,
    pub global_max_iterations: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let mut budgets = HashMap::new();
        budgets.insert(CouncilStatus::Exploring, StateBudget::timeout_only(Duration::from_secs(60)));
        budgets.insert(CouncilStatus::Analyzing, StateBudget::timeout_only(Duration::from_secs(30)));
        budgets.insert(CouncilStatus::Planning, StateBudget::timeout_only(Duration::from_secs(2 * 60)));
        budgets.insert(CouncilStatus::Coding, StateBudget::timeout_only(Duration::from_secs(15 * 60)));
        budgets.insert(CouncilStatus::Testing, StateBudget::timeout_only(Duration::from_secs(5 * 60)));
        budgets.insert(CouncilStatus::Healing, StateBudget::timeout_only(Duration::from_secs(10 * 60)));
        budgets.insert(CouncilStatus::Reviewing, StateBudget::timeout_only(Duration::from_secs(2 * 60)));
        Self { budgets, global_max_iterations: 50 }
    }
}

impl BudgetConfig {
    pub fn budget_for(&self, state: CouncilStatus) -> StateBudget {
        self.budgets.get(&state).cloned().unwrap_or_else(StateBudget::unlimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_analyzing() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), CouncilStatus::Analyzing);
        assert!(!sm.is_terminal());
    }

    #[test]
    fn test_full_happy_path_to_completed() {
        let mut sm = StateMachine::new();
        for to in [
            CouncilStatus::Exploring,
            CouncilStatus::Analyzing,
            CouncilStatus::Planning,
            CouncilStatus::Coding,
            CouncilStatus::Testing,
            CouncilStatus::Reviewing,
            CouncilStatus::Completed,
        ] {
            sm.advance(to, None).unwrap();
        }
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 7);
    }

    #[test]
    fn test_testing_can_go_to_healing_then_reviewing() {
        let mut sm = StateMachine::new();
        for to in [CouncilStatus::Exploring, CouncilStatus::Analyzing, CouncilStatus::Planning, CouncilStatus::Coding, CouncilStatus::Testing] {
            sm.advance(to, None).unwrap();
        }
        sm.advance(CouncilStatus::Healing, Some("2 tests failed")).unwrap();
        sm.advance(CouncilStatus::Reviewing, None).unwrap();
        assert_eq!(sm.current(), CouncilStatus::Reviewing);
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.advance(CouncilStatus::Coding, None).unwrap_err();
        assert_eq!(err.from, CouncilStatus::Analyzing);
        assert_eq!(err.to, CouncilStatus::Coding);
        // current state is unchanged after a rejected transition
        assert_eq!(sm.current(), CouncilStatus::Analyzing);
    }

    #[test]
    fn test_any_nonterminal_state_can_fail() {
        let mut sm = StateMachine::new();
        sm.advance(CouncilStatus::Exploring, None).unwrap();
        sm.fail("context load errored").unwrap();
        assert_eq!(sm.current(), CouncilStatus::Failed);
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_reviewing_can_reach_any_terminal_status() {
        for terminal in [CouncilStatus::Completed, CouncilStatus::Failed, CouncilStatus::HumanRequired] {
            let mut sm = StateMachine::new();
            for to in [
                CouncilStatus::Exploring,
                CouncilStatus::Analyzing,
                CouncilStatus::Planning,
                CouncilStatus::Coding,
                CouncilStatus::Testing,
                CouncilStatus::Reviewing,
            ] {
                sm.advance(to, None).unwrap();
            }
            sm.advance(terminal, None).unwrap();
            assert_eq!(sm.current(), terminal);
        }
    }

    #[test]
    fn test_terminal_state_cannot_transition_further() {
        let mut sm = StateMachine::new();
        sm.fail("boom").unwrap();
        assert!(sm.advance(CouncilStatus::Exploring, None).is_err());
    }

    #[test]
    fn test_default_budget_config_has_entries_for_every_bounded_state() {
        let config = BudgetConfig::default();
        for state in [
            CouncilStatus::Exploring,
            CouncilStatus::Analyzing,
            CouncilStatus::Planning,
            CouncilStatus::Coding,
            CouncilStatus::Testing,
            CouncilStatus::Healing,
            CouncilStatus::Reviewing,
        ] {
            assert!(config.budget_for(state).timeout_ms.is_some());
        }
    }
}
