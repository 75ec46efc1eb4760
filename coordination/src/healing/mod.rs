//! Self-Healing Loop: bounded retry against a failing test command, with a
//! pluggable fix-attempt strategy.
//!
//! `SelfHealingLoop` tracks attempts up to `max_attempts` and logs a
//! per-attempt record in the same iteration-record idiom the progress
//! ledger uses. The fix-attempt strategy itself is a pluggable
//! `FixStrategy` trait, with `ReinvokeWithTraceback` as the provided
//! implementation — append the parsed failure text to the coder's context
//! and re-invoke `execute`.

use chrono::{DateTime, Utc};

use crate::agents::{AgentContext, Execute, ExecuteResult, LlmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: u32,
    pub failed: u32,
    pub raw_output: String,
}

/// Runs the project's configured test command. Implementations shell out
/// or invoke an in-process test harness; the loop only needs pass/fail
/// counts and the raw output to hand to a `FixStrategy`.
#[async_trait::async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> TestOutcome;
}

#[derive(Debug, Clone)]
pub struct HealingAttempt {
    pub attempt_number: u32,
    pub failure_text: String,
    pub fix_output: Option<ExecuteResult>,
    pub fix_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealingReport {
    pub status: HealingStatus,
    pub iterations: u32,
    pub initial_failures: u32,
    pub final_failures: u32,
    pub final_passed: u32,
    pub final_raw_output: String,
    pub final_error: Option<String>,
    pub attempts: Vec<HealingAttempt>,
}

/// One way to turn a parsed failure into another attempt at the task.
#[async_trait::async_trait]
pub trait FixStrategy: Send + Sync {
    async fn attempt_fix(&self, task: &str, failure_text: &str) -> Result<ExecuteResult, LlmError>;
}

/// Appends the failure text to the coder agent's context under
/// `previous_failure` and re-invokes `execute`. The "minimum viable"
/// fix-attempt strategy: no static analysis, just hand the traceback back
/// to the model that wrote the code.
pub struct ReinvokeWithTraceback<E: Execute> {
    coder: E,
}

impl<E: Execute> ReinvokeWithTraceback<E> {
    pub fn new(coder: E) -> Self {
        Self { coder }
    }
}

#[async_trait::async_trait]
impl<E: Execute> FixStrategy for ReinvokeWithTraceback<E> {
    async fn attempt_fix(&self, task: &str, failure_text: &str) -> Result<ExecuteResult, LlmError> {
        let mut context: AgentContext = AgentContext::new();
        context.insert("previous_failure".to_string(), serde_json::Value::String(failure_text.to_string()));
        self.coder.execute(task, Some(&context)).await
    }
}

pub struct SelfHealingLoop<R: TestRunner, F: FixStrategy> {
    test_runner: R,
    fix_strategy: F,
    max_iterations: u32,
}

impl<R: TestRunner, F: FixStrategy> SelfHealingLoop<R, F> {
    pub fn new(test_runner: R, fix_strategy: F, max_iterations: u32) -> Self {
        Self { test_runner, fix_strategy, max_iterations }
    }

    pub async fn run(&self, task: &str) -> HealingReport {
        let mut iterations = 0u32;
        let mut initial_failures: Option<u32> = None;
        let mut final_failures = 0u32;
        let mut final_passed = 0u32;
        let mut final_raw_output = String::new();
        let mut final_error = None;
        let mut attempts = Vec::new();

        for i in 1..=self.max_iterations {
            iterations = i;
            let outcome = self.test_runner.run().await;
            if initial_failures.is_none() {
                initial_failures = Some(outcome.failed);
            }
            final_failures = outcome.failed;
            final_passed = outcome.passed;
            final_raw_output = outcome.raw_output.clone();

            if outcome.failed == 0 {
                tracing::info!(iteration = i, "self-healing loop converged to a passing test state");
                break;
            }

            match self.fix_strategy.attempt_fix(task, &outcome.raw_output).await {
                Ok(fix_output) => {
                    tracing::info!(iteration = i, "self-healing loop applied a fix attempt");
                    attempts.push(HealingAttempt {
                        attempt_number: i,
                        failure_text: outcome.raw_output,
                        fix_output: Some(fix_output),
                        fix_error: None,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::info!(iteration = i, error = %e, "self-healing loop's fix attempt errored");
                    final_error = Some(e.to_string());
                    attempts.push(HealingAttempt {
                        attempt_number: i,
                        failure_text: outcome.raw_output,
                        fix_output: None,
                        fix_error: Some(e.to_string()),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        let initial_failures = initial_failures.unwrap_or(0);
        let status = if final_failures == 0 {
            HealingStatus::Success
        } else if final_failures < initial_failures {
            HealingStatus::Partial
        } else {
            HealingStatus::Failed
        };

        HealingReport { status, iterations, initial_failures, final_failures, final_passed, final_raw_output, final_error, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentIdentity;
    use std::sync::Mutex;

    struct ScriptedTestRunner {
        outcomes: Mutex<Vec<TestOutcome>>,
    }

    impl ScriptedTestRunner {
        fn new(outcomes: Vec<TestOutcome>) -> Self {
            Self { outcomes: Mutex::new(outcomes) }
        }
    }

    #[async_trait::async_trait]
    impl TestRunner for ScriptedTestRunner {
        async fn run(&self) -> TestOutcome {
            let mut queue = self.outcomes.lock().unwrap();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        }
    }

    struct StubCoder {
        identity: AgentIdentity,
    }

    #[async_trait::async_trait]
    impl Execute for StubCoder {
        fn identity(&self) -> &AgentIdentity {
            &self.identity
        }

        async fn execute(&self, _task: &str, _plan: Option<&AgentContext>) -> Result<ExecuteResult, LlmError> {
            Ok(ExecuteResult::ok("patched"))
        }
    }

    fn outcome(passed: u32, failed: u32, raw: &str) -> TestOutcome {
        TestOutcome { passed, failed, raw_output: raw.to_string() }
    }

    #[tokio::test]
    async fn test_immediate_success_needs_no_fix_attempts() {
        let runner = ScriptedTestRunner::new(vec![outcome(10, 0, "")]);
        let fixer = ReinvokeWithTraceback::new(StubCoder { identity: AgentIdentity::new("coder", "p", "m") });
        let healer = SelfHealingLoop::new(runner, fixer, 3);

        let report = healer.run("fix the login bug").await;
        assert_eq!(report.status, HealingStatus::Success);
        assert_eq!(report.iterations, 1);
        assert!(report.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_converges_to_success_after_fix() {
        let runner = ScriptedTestRunner::new(vec![outcome(8, 2, "AssertionError: x != y"), outcome(10, 0, "")]);
        let fixer = ReinvokeWithTraceback::new(StubCoder { identity: AgentIdentity::new("coder", "p", "m") });
        let healer = SelfHealingLoop::new(runner, fixer, 3);

        let report = healer.run("fix the login bug").await;
        assert_eq!(report.status, HealingStatus::Success);
        assert_eq!(report.initial_failures, 2);
        assert_eq!(report.final_failures, 0);
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_progress_when_failures_reduced_but_nonzero() {
        let runner = ScriptedTestRunner::new(vec![outcome(5, 5, "boom"), outcome(8, 2, "boom again")]);
        let fixer = ReinvokeWithTraceback::new(StubCoder { identity: AgentIdentity::new("coder", "p", "m") });
        let healer = SelfHealingLoop::new(runner, fixer, 2);

        let report = healer.run("fix it").await;
        assert_eq!(report.status, HealingStatus::Partial);
        assert_eq!(report.initial_failures, 5);
        assert_eq!(report.final_failures, 2);
    }

    #[tokio::test]
    async fn test_failed_when_no_progress_after_max_iterations() {
        let runner = ScriptedTestRunner::new(vec![outcome(5, 5, "boom")]);
        let fixer = ReinvokeWithTraceback::new(StubCoder { identity: AgentIdentity::new("coder", "p", "m") });
        let healer = SelfHealingLoop::new(runner, fixer, 3);

        let report = healer.run("fix it").await;
        assert_eq!(report.status, HealingStatus::Failed);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.attempts.len(), 3);
    }
}
