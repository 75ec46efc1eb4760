//! Orchestration loop: drive one task through the EPCC pipeline —
//! Explore → Analyze → Plan → Code → Test → Heal → Review — to a terminal
//! status.
//!
//! A state-machine-driving loop walks one task through each EPCC step,
//! logging progress with `tracing` and consulting `coordination`'s stock
//! agent roster and consensus machinery at each transition.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use coordination::{
    Checkpoint, CheckpointStore, CompletionClient, ConsensusDecision, DecisionType, DualLedger,
    Event, EventBus, Execute, GovernanceGateway, MinimalThinkResult, MinimalVote, NamedVote,
    ReinvokeWithTraceback, SelfHealingLoop, SharedCheckpointStore, SharedEventBus, Think,
    TestOutcome, TestRunner, Vote, WaldConsensus,
};
use tracing::{info, warn};

use crate::agents::security_auditor::{plan_risks_warrant_audit, vote_has_security_flag};
use crate::agents::{Architect, Coder, Reviewer, SecurityAuditor, WebResearcher};
use crate::config::SwarmConfig;
use crate::council_state::{CouncilState, Plan, ReviewComment, SubtaskRecord, SubtaskStatus, TestResult};
use crate::state_machine::{BudgetConfig, CancellationReason, CouncilStatus, IllegalTransition, StateMachine};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("internal state machine error: {0}")]
    IllegalTransition(#[from] IllegalTransition),
    #[error("state cancelled: {0}")]
    Cancelled(CancellationReason),
}

/// Runs `fut` under `status`'s configured timeout, translating an expiry
/// into the same typed error path a failed LLM or test-run call takes
/// (SPEC_FULL.md §4.5's per-state timeout/cancellation note). A state with
/// no configured timeout runs unbounded.
async fn apply_budget<Fut>(budget: &BudgetConfig, status: CouncilStatus, fut: Fut) -> Result<(), OrchestratorError>
where
    Fut: std::future::Future<Output = Result<(), OrchestratorError>>,
{
    let Some(limit_ms) = budget.budget_for(status).timeout_ms else {
        return fut.await;
    };

    let start = std::time::Instant::now();
    match tokio::time::timeout(Duration::from_millis(limit_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Cancelled(CancellationReason::Timeout {
            state: status,
            elapsed_ms: start.elapsed().as_millis() as u64,
            limit_ms,
        })),
    }
}

/// Shells out the configured test command and parses `N passed`/`M failed`
/// from its combined stdout+stderr.
#[derive(Debug, Clone)]
pub struct ShellTestRunner {
    command: String,
}

impl ShellTestRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait::async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(&self) -> TestOutcome {
        let output = tokio::process::Command::new("sh").arg("-c").arg(&self.command).output().await;

        match output {
            Ok(output) => {
                let raw_output = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                let (passed, failed) = parse_test_counts(&raw_output);
                TestOutcome { passed, failed, raw_output }
            }
            Err(e) => TestOutcome { passed: 0, failed: 1, raw_output: format!("failed to run test command `{}`: {e}", self.command) },
        }
    }
}

/// Wraps a `TestRunner` so every run it performs also publishes a
/// `TestPassed`/`TestFailed` event on the shared hub. Used inside HEALING
/// so the self-healing loop's per-iteration test runs project onto the
/// `ProgressLedger`'s stagnation counter the same way a top-level TESTING
/// run does, instead of only recording a summary after the loop finishes.
#[derive(Clone)]
struct EventPublishingTestRunner<R: TestRunner + Clone> {
    inner: R,
    event_bus: SharedEventBus,
    thread_id: String,
    test_command: String,
}

#[async_trait::async_trait]
impl<R: TestRunner + Clone> TestRunner for EventPublishingTestRunner<R> {
    async fn run(&self) -> TestOutcome {
        let outcome = self.inner.run().await;
        let event = if outcome.failed == 0 {
            Event::TestPassed {
                thread_id: self.thread_id.clone(),
                test_command: self.test_command.clone(),
                summary: format!("{} passed", outcome.passed),
                timestamp: Utc::now(),
            }
        } else {
            Event::TestFailed {
                thread_id: self.thread_id.clone(),
                test_command: self.test_command.clone(),
                failure_summary: format!("{} failed", outcome.failed),
                timestamp: Utc::now(),
            }
        };
        self.event_bus.publish(event).ok();
        outcome
    }
}

fn parse_test_counts(output: &str) -> (u32, u32) {
    let passed = regex::Regex::new(r"(\d+)\s+passed")
        .ok()
        .and_then(|re| re.captures(output))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let failed = regex::Regex::new(r"(\d+)\s+failed")
        .ok()
        .and_then(|re| re.captures(output))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    (passed, failed)
}

/// Keyword-bucket fallback classifier. The structured-plan path (the
/// architect's `think_structured` result) drives PLANNING; this only feeds
/// `state.metadata["task_type"]` for observability.
fn classify_task(task: &str) -> &'static str {
    let lower = task.to_lowercase();
    if lower.contains("security") || lower.contains("vulnerab") || lower.contains("auth") {
        "security"
    } else if lower.contains("fix") || lower.contains("bug") {
        "bugfix"
    } else if lower.contains("test") {
        "testing"
    } else {
        "feature"
    }
}

fn needs_research(task: &str) -> bool {
    let lower = task.to_lowercase();
    ["library", "crate", "api", "integrate", "sdk"].iter().any(|kw| lower.contains(kw))
}

fn plan_context(plan: &Plan) -> coordination::AgentContext {
    match serde_json::to_value(plan) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => coordination::AgentContext::new(),
    }
}

fn review_proposal_summary(state: &CouncilState) -> String {
    let mut summary = format!("Task: {}\n", state.task);
    if let Some(plan) = &state.plan {
        summary.push_str(&format!("Subtasks completed: {}\n", plan.subtasks.len()));
        for subtask in &plan.subtasks {
            if let Some(result) = &subtask.result {
                summary.push_str(&format!("- {}: {result}\n", subtask.description));
            }
        }
        if !plan.risks.is_empty() {
            summary.push_str(&format!("Flagged risks: {}\n", plan.risks.join(", ")));
        }
    }
    if let Some(last) = state.test_results.last() {
        summary.push_str(&format!("Last test run: {} passed, {} failed\n", last.passed, last.failed));
    }
    summary
}

/// Drives one task through the EPCC pipeline on top of `coordination`'s
/// deliberation core. Owns the stock agent roster (architect, coder,
/// reviewer, security auditor, web researcher) over a shared
/// `CompletionClient`, a governance gateway for HITL gating, and the test
/// runner consulted in TESTING/HEALING.
pub struct Orchestrator<R: TestRunner> {
    config: SwarmConfig,
    client: Arc<dyn CompletionClient>,
    architect: Architect,
    coder: Coder,
    reviewer: Reviewer,
    security_auditor: SecurityAuditor,
    web_researcher: WebResearcher,
    governance: GovernanceGateway,
    wald: WaldConsensus,
    test_runner: R,
    checkpoint_store: Option<SharedCheckpointStore>,
    budget: BudgetConfig,
}

impl<R: TestRunner + Clone> Orchestrator<R> {
    pub fn new(config: SwarmConfig, client: Arc<dyn CompletionClient>, test_runner: R) -> Self {
        let architect = Architect::new(config.model_for("architect"), client.clone());
        let coder = Coder::new(config.model_for("coder"), client.clone());
        let reviewer = Reviewer::new(config.model_for("reviewer"), client.clone());
        let security_auditor = SecurityAuditor::new(config.model_for("security_auditor"), client.clone());
        let web_researcher = WebResearcher::new(config.model_for("web_researcher"), client.clone());
        let wald = WaldConsensus::new(config.wald.clone().into());

        Self {
            config,
            client,
            architect,
            coder,
            reviewer,
            security_auditor,
            web_researcher,
            governance: GovernanceGateway::new(),
            wald,
            test_runner,
            checkpoint_store: None,
            budget: BudgetConfig::default(),
        }
    }

    /// Attaches a checkpoint store so every state transition is persisted
    /// as a step-indexed checkpoint keyed by this run's thread id. Swapping
    /// realizations (embedded vs. network key-value) changes nothing about
    /// the state machine itself, per `CheckpointStore`'s own contract.
    pub fn with_checkpoint_store(mut self, store: SharedCheckpointStore) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Overrides the default per-state timeout and global iteration budget.
    pub fn with_budget_config(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Runs `task` to a terminal `CouncilState` — every run ends with
    /// `status` equal to exactly one of COMPLETED, FAILED, HUMAN_REQUIRED.
    pub async fn run(&self, task: &str) -> Result<CouncilState, OrchestratorError> {
        let thread_id = Event::new_id();
        let ledger = Arc::new(Mutex::new(DualLedger::new(thread_id.clone(), task.to_string())));
        let event_bus = EventBus::new().with_ledger(ledger.clone()).shared();

        let mut state = CouncilState::new(task);
        let mut sm = StateMachine::new();
        state.log("starting EPCC pipeline");
        event_bus.publish(Event::TaskCreated { thread_id: thread_id.clone(), task_id: thread_id.clone(), goal: task.to_string(), timestamp: Utc::now() }).ok();

        if let Some(store) = &self.checkpoint_store {
            if let Err(e) = store.initialize().await {
                warn!(error = %e, "checkpoint store initialization failed, proceeding without persistence for this run");
            }
        }

        let mut step = 0u64;
        let mut iterations = 0u32;
        loop {
            let status = sm.current();
            if matches!(status, CouncilStatus::Completed | CouncilStatus::Failed | CouncilStatus::HumanRequired) {
                break;
            }

            iterations += 1;
            if iterations > self.budget.global_max_iterations {
                let reason = CancellationReason::GlobalBudgetExhausted { total_iterations: iterations, limit: self.budget.global_max_iterations };
                warn!(%reason, "global iteration budget exhausted, failing run");
                state.log(format!("cancelled: {reason}"));
                ledger.lock().expect("ledger lock poisoned").progress.record_blocked(status.to_string(), reason.to_string());
                sm.fail(&reason.to_string())?;
                state.status = sm.current();
                step += 1;
                self.save_checkpoint(&thread_id, step, &mut state, &ledger).await;
                break;
            }

            let outcome = match status {
                CouncilStatus::Analyzing => self.run_analyzing(&mut sm, &mut state),
                CouncilStatus::Exploring => apply_budget(&self.budget, status, self.run_exploring(&mut sm, &mut state)).await,
                CouncilStatus::Planning => apply_budget(&self.budget, status, self.run_planning(&mut sm, &mut state)).await,
                CouncilStatus::Coding => apply_budget(&self.budget, status, self.run_coding(&mut sm, &mut state, &event_bus, &thread_id)).await,
                CouncilStatus::Testing => apply_budget(&self.budget, status, self.run_testing(&mut sm, &mut state, &event_bus, &thread_id)).await,
                CouncilStatus::Healing => apply_budget(&self.budget, status, self.run_healing(&mut sm, &mut state, &event_bus, &thread_id)).await,
                CouncilStatus::Reviewing => apply_budget(&self.budget, status, self.run_reviewing(&mut sm, &mut state)).await,
                CouncilStatus::Completed | CouncilStatus::Failed | CouncilStatus::HumanRequired => unreachable!("terminal states break above"),
            };

            match outcome {
                Ok(()) => {}
                Err(OrchestratorError::Cancelled(reason)) => {
                    warn!(%reason, "state cancelled, failing run");
                    state.log(format!("cancelled: {reason}"));
                    ledger.lock().expect("ledger lock poisoned").progress.record_blocked(status.to_string(), reason.to_string());
                    sm.fail(&reason.to_string())?;
                }
                Err(e) => return Err(e),
            }
            state.status = sm.current();

            step += 1;
            self.save_checkpoint(&thread_id, step, &mut state, &ledger).await;
        }

        match state.status {
            CouncilStatus::Completed => {
                event_bus.publish(Event::TaskCompleted { thread_id: thread_id.clone(), task_id: thread_id.clone(), timestamp: Utc::now() }).ok();
            }
            CouncilStatus::Failed => {
                event_bus
                    .publish(Event::TaskFailed { thread_id: thread_id.clone(), task_id: thread_id.clone(), error: "pipeline ended in FAILED".to_string(), timestamp: Utc::now() })
                    .ok();
            }
            _ => {}
        }

        Ok(state)
    }

    /// First visit loads nothing and defers to EXPLORING; the second visit
    /// (after EXPLORING has set `context_loaded`) classifies the task and
    /// moves on to PLANNING.
    fn run_analyzing(&self, sm: &mut StateMachine, state: &mut CouncilState) -> Result<(), OrchestratorError> {
        if !state.context_loaded() {
            state.log("no context loaded yet, exploring first");
            sm.advance(CouncilStatus::Exploring, None)?;
            return Ok(());
        }

        let task_type = classify_task(&state.task);
        state.metadata.insert("task_type".to_string(), serde_json::Value::String(task_type.to_string()));
        state.metadata.insert("recommended_model".to_string(), serde_json::Value::String(self.config.model_for("coder")));
        state.log(format!("classified task as {task_type}"));
        sm.advance(CouncilStatus::Planning, None)?;
        Ok(())
    }

    async fn run_exploring(&self, sm: &mut StateMachine, state: &mut CouncilState) -> Result<(), OrchestratorError> {
        state.metadata.insert("context_loaded".to_string(), serde_json::Value::Bool(true));

        if needs_research(&state.task) {
            match self.web_researcher.think_structured(&state.task, None).await {
                Ok(result) => {
                    state.log(format!("web researcher surfaced {} concern(s)", result.concerns.len()));
                    state.metadata.insert("research_concerns".to_string(), serde_json::to_value(&result.concerns).unwrap_or_default());
                }
                Err(e) => {
                    warn!(error = %e, "web researcher call failed, proceeding without background");
                    state.log(format!("web researcher call failed: {e}"));
                }
            }
        }

        sm.advance(CouncilStatus::Analyzing, None)?;
        Ok(())
    }

    async fn run_planning(&self, sm: &mut StateMachine, state: &mut CouncilState) -> Result<(), OrchestratorError> {
        let history: coordination::AgentContext = state.metadata.clone();
        let think_result = match self.architect.think_structured(&state.task, Some(&history)).await {
            Ok(result) => result,
            Err(e) => {
                self.governance.record_agent_failure("architect");
                state.log(format!("architect think_structured failed: {e}"));
                MinimalThinkResult::empty()
            }
        };

        let plan = if think_result.suggestions.is_empty() {
            Plan::single_subtask(&state.task)
        } else {
            Plan {
                goal: state.task.clone(),
                subtasks: think_result
                    .suggestions
                    .iter()
                    .enumerate()
                    .map(|(i, s)| SubtaskRecord::pending(format!("subtask-{}", i + 1), s.description.clone()))
                    .collect(),
                risks: think_result.concerns,
            }
        };

        info!(subtasks = plan.subtasks.len(), "architect produced a plan");
        state.log(format!("planned {} subtask(s)", plan.subtasks.len()));
        state.plan = Some(plan);
        sm.advance(CouncilStatus::Coding, None)?;
        Ok(())
    }

    async fn run_coding(&self, sm: &mut StateMachine, state: &mut CouncilState, event_bus: &SharedEventBus, thread_id: &str) -> Result<(), OrchestratorError> {
        if self.config.task_requires_hitl(&state.task) {
            let request = self.governance.create_decision_request(
                DecisionType::ArchitectureChange,
                state.task.clone(),
                Vec::new(),
                "task text matched a configured HITL keyword",
                "orchestrator",
            );
            state.log(format!("task text triggered a HITL decision gate ({})", request.request_id));
            event_bus
                .publish(Event::InterruptRaised { thread_id: thread_id.to_string(), approval_id: request.request_id.clone(), reason: "HITL keyword gate".to_string(), timestamp: Utc::now() })
                .ok();

            let approved = self.governance.wait_for_approval(&request.request_id, Duration::from_secs(self.config.approval_timeout_secs)).await;
            if !approved {
                state.log("HITL decision gate was not approved before timeout");
                sm.advance(CouncilStatus::HumanRequired, Some("HITL keyword gate not approved before timeout"))?;
                return Ok(());
            }
        }

        let mut plan = state.plan.clone().expect("CODING entered without a plan");
        let context = plan_context(&plan);
        let mut files_changed = Vec::new();

        for subtask in plan.subtasks.iter_mut().filter(|s| matches!(s.status, SubtaskStatus::Pending)) {
            match self.coder.execute(&subtask.description, Some(&context)).await {
                Ok(result) if result.success => {
                    subtask.mark_done(result.output.clone());
                    files_changed.push(subtask.id.clone());
                    state.log(format!("subtask {} done", subtask.id));
                }
                Ok(result) => {
                    let error = if result.errors.is_empty() { "coder reported failure".to_string() } else { result.errors.join("; ") };
                    subtask.mark_failed(error.clone());
                    state.plan = Some(plan);
                    state.log(format!("subtask {} failed: {error}", subtask.id));
                    sm.advance(CouncilStatus::Failed, Some("coder reported failure on a subtask"))?;
                    return Ok(());
                }
                Err(e) => {
                    if self.governance.record_agent_failure("coder") {
                        warn!("coder's circuit breaker tripped after repeated failures");
                    }
                    subtask.mark_failed(e.to_string());
                    state.plan = Some(plan);
                    state.log(format!("subtask {} errored: {e}", subtask.id));
                    sm.advance(CouncilStatus::Failed, Some("coder call errored on a subtask"))?;
                    return Ok(());
                }
            }
        }

        let done_count = plan.subtasks.len();
        state.plan = Some(plan);
        if !files_changed.is_empty() {
            event_bus
                .publish(Event::CodeWritten {
                    thread_id: thread_id.to_string(),
                    files_changed,
                    summary: format!("completed {done_count} subtask(s)"),
                    timestamp: Utc::now(),
                })
                .ok();
        }
        sm.advance(CouncilStatus::Testing, None)?;
        Ok(())
    }

    async fn run_testing(&self, sm: &mut StateMachine, state: &mut CouncilState, event_bus: &SharedEventBus, thread_id: &str) -> Result<(), OrchestratorError> {
        let outcome = self.test_runner.run().await;
        state.test_results.push(TestResult { passed: outcome.passed, failed: outcome.failed, raw_output: outcome.raw_output.clone(), timestamp: Utc::now() });

        if outcome.failed == 0 {
            state.log(format!("tests passed: {} passed, 0 failed", outcome.passed));
            event_bus
                .publish(Event::TestPassed { thread_id: thread_id.to_string(), test_command: self.config.test_command.clone(), summary: format!("{} passed", outcome.passed), timestamp: Utc::now() })
                .ok();
            sm.advance(CouncilStatus::Reviewing, None)?;
        } else {
            state.log(format!("tests failed: {} passed, {} failed", outcome.passed, outcome.failed));
            event_bus
                .publish(Event::TestFailed {
                    thread_id: thread_id.to_string(),
                    test_command: self.config.test_command.clone(),
                    failure_summary: format!("{} failed", outcome.failed),
                    timestamp: Utc::now(),
                })
                .ok();
            sm.advance(CouncilStatus::Healing, Some("test run reported failures"))?;
        }
        Ok(())
    }

    /// Bounded retry via `SelfHealingLoop`; always transitions to REVIEWING
    /// afterward regardless of whether healing converged. Each inner test
    /// run publishes a `TestPassed`/`TestFailed` event so the loop's
    /// iterations feed the same ledger stagnation tracking a top-level
    /// TESTING run does.
    async fn run_healing(&self, sm: &mut StateMachine, state: &mut CouncilState, event_bus: &SharedEventBus, thread_id: &str) -> Result<(), OrchestratorError> {
        let healing_coder = Coder::new(self.config.model_for("coder"), self.client.clone());
        let fix_strategy = ReinvokeWithTraceback::new(healing_coder);
        let test_runner = EventPublishingTestRunner {
            inner: self.test_runner.clone(),
            event_bus: event_bus.clone(),
            thread_id: thread_id.to_string(),
            test_command: self.config.test_command.clone(),
        };
        let healing_loop = SelfHealingLoop::new(test_runner, fix_strategy, self.config.max_healing_iterations);
        let report = healing_loop.run(&state.task).await;

        // Healing's own last test run is this state's most current one —
        // without this, REVIEWING's proposal summary would still quote the
        // pre-healing failure counts even after a successful fix.
        state.test_results.push(TestResult {
            passed: report.final_passed,
            failed: report.final_failures,
            raw_output: report.final_raw_output.clone(),
            timestamp: Utc::now(),
        });

        state.metadata.insert("healing_status".to_string(), serde_json::Value::String(format!("{:?}", report.status)));
        state.metadata.insert("healing_iterations".to_string(), serde_json::Value::from(report.iterations));
        state.log(format!(
            "self-healing loop finished after {} iteration(s): {} -> {} failures ({:?})",
            report.iterations, report.initial_failures, report.final_failures, report.status
        ));

        sm.advance(CouncilStatus::Reviewing, Some("healing loop completed"))?;
        Ok(())
    }

    async fn run_reviewing(&self, sm: &mut StateMachine, state: &mut CouncilState) -> Result<(), OrchestratorError> {
        let proposal = review_proposal_summary(state);
        let plan_risks: Vec<String> = state.plan.as_ref().map(|p| p.risks.clone()).unwrap_or_default();
        let include_security = plan_risks_warrant_audit(&plan_risks);

        let mut named_votes: Vec<(String, MinimalVote)> = Vec::new();
        named_votes.push(("reviewer".to_string(), self.cast_vote(&self.reviewer, &proposal).await));
        named_votes.push(("architect".to_string(), self.cast_vote(&self.architect, &proposal).await));
        named_votes.push(("coder".to_string(), self.cast_vote(&self.coder, &proposal).await));
        if include_security {
            let vote = self.cast_vote(&self.security_auditor, &proposal).await;
            if vote_has_security_flag(&vote) {
                state.log("security auditor flagged a security risk");
            }
            named_votes.push(("security_auditor".to_string(), vote));
        }

        for (agent, vote) in &named_votes {
            state.review_comments.push(ReviewComment {
                agent: agent.clone(),
                vote: vote.vote.to_legacy().to_string(),
                confidence: vote.confidence,
                blocking_reason: vote.blocking_reason.clone(),
            });
        }

        let refs: Vec<NamedVote> = named_votes.iter().map(|(agent, vote)| NamedVote { agent, vote }).collect();
        let result = self.wald.evaluate(&refs);
        state.log(format!("consensus {:?}: pi_approve={:.2} ({})", result.decision, result.pi_approve, result.reason));

        match result.decision {
            ConsensusDecision::AutoCommit => sm.advance(CouncilStatus::Completed, Some("consensus auto-committed"))?,
            ConsensusDecision::Reject => sm.advance(CouncilStatus::Failed, Some("consensus rejected"))?,
            ConsensusDecision::HoldForHuman => sm.advance(CouncilStatus::HumanRequired, Some("consensus held for human review"))?,
        }
        Ok(())
    }

    /// Persists `state` as step `step` of `thread_id`, when a checkpoint
    /// store is attached. A save failure is recorded as a BLOCKED
    /// iteration on `ledger`'s progress ledger and appended to `state`'s
    /// own log, rather than aborting the pipeline — per spec, a
    /// persistence failure is surfaced but never silently swallowed and
    /// never crashes the run.
    async fn save_checkpoint(&self, thread_id: &str, step: u64, state: &mut CouncilState, ledger: &Mutex<DualLedger>) {
        let Some(store) = &self.checkpoint_store else { return };

        let snapshot = match serde_json::to_value(&*state) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => {
                warn!(thread_id, step, "council state failed to serialize, skipping checkpoint");
                return;
            }
        };
        let checkpoint = Checkpoint::new(thread_id.to_string(), step, snapshot);

        if let Err(e) = store.save(&checkpoint).await {
            warn!(thread_id, step, error = %e, "checkpoint save failed, recording a blocked iteration");
            let message = format!("checkpoint save failed at step {step}: {e}");
            state.log(message.clone());
            ledger.lock().expect("ledger lock poisoned").progress.record_blocked("save_checkpoint", message);
        }
    }

    async fn cast_vote(&self, agent: &(dyn Vote + Send + Sync), proposal: &str) -> MinimalVote {
        match agent.vote_structured(proposal, None).await {
            Ok(vote) => vote,
            Err(e) => {
                self.governance.record_agent_failure(&agent.identity().name);
                MinimalVote::hold_on_failure(e.to_string())
            }
        }
    }
}
