//! Governance Gateway: human-in-the-loop (HITL) interception of high-risk
//! actions and decisions.
//!
//! Combines action/decision risk tables, a dangerous-content regex
//! scanner, a protected-path glob list, a per-agent circuit breaker, and
//! an approval request/log lifecycle. `PROTECTED_PATHS` matching is done
//! with a hand-rolled `fnmatch`-equivalent rather than pulling in a glob
//! crate: `*`/`?` translated to a regex with no path-separator awareness,
//! which is what `fnmatch_to_regex` below implements.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    FileDelete,
    FileModify,
    ConfigChange,
    Deploy,
    Database,
    ExternalApi,
    Security,
    Financial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionType {
    ModelSelection,
    ArchitectureChange,
    DeployStrategy,
    DataRetention,
    SecurityException,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    Action,
    Decision,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub risk_level: RiskLevel,
    pub description: String,
    pub affected_resources: Vec<String>,
    pub rationale: String,
    pub action_type: Option<ActionType>,
    pub decision_type: Option<DecisionType>,
    pub request_kind: ApprovalKind,
    pub requestor: String,
    pub created_at: DateTime<Utc>,
    pub approved: Option<bool>,
    pub approver: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Outcome of `check_safety`: a 2025-best-practice quick risk read that
/// combines action text, scanned content, and affected paths into one
/// recommendation.
#[derive(Debug, Clone)]
pub struct SafetyCheck {
    pub safe: bool,
    pub risk_level: RiskLevel,
    pub requires_hitl: bool,
    pub reason: String,
}

fn high_risk_actions() -> &'static HashMap<ActionType, RiskLevel> {
    static TABLE: Lazy<HashMap<ActionType, RiskLevel>> = Lazy::new(|| {
        use ActionType::*;
        use RiskLevel::*;
        HashMap::from([
            (FileDelete, High),
            (Deploy, Critical),
            (Database, Critical),
            (Security, Critical),
            (Financial, Critical),
            (ConfigChange, Medium),
            (ExternalApi, Medium),
            (FileModify, Low),
        ])
    });
    &TABLE
}

fn high_risk_decisions() -> &'static HashMap<DecisionType, RiskLevel> {
    static TABLE: Lazy<HashMap<DecisionType, RiskLevel>> = Lazy::new(|| {
        use DecisionType::*;
        use RiskLevel::*;
        HashMap::from([
            (ArchitectureChange, High),
            (DeployStrategy, High),
            (SecurityException, Critical),
            (DataRetention, Medium),
            (ModelSelection, Low),
        ])
    });
    &TABLE
}

/// `(pattern, risk)` pairs scanned against action+content text, in the
/// order the teacher's table lists them (matters for `CRITICAL` short
/// circuiting before weaker patterns are even considered).
fn dangerous_patterns() -> &'static [(Regex, RiskLevel)] {
    static PATTERNS: Lazy<Vec<(Regex, RiskLevel)>> = Lazy::new(|| {
        use RiskLevel::*;
        [
            (r"rm\s+-[rRfF]+", Critical),
            (r"rm\s+.*\s+-[rRfF]+", Critical),
            (r"mkfs", Critical),
            (r"dd\s+if=", Critical),
            (r"os\.system\(['\x22]rm", Critical),
            (r"subprocess\.(call|run|Popen)\(['\x22]rm", Critical),
            (r"shutil\.rmtree", High),
            (r"DROP\s+(TABLE|DATABASE)", Critical),
            (r"DELETE\s+FROM\s+\w+\s*;", Critical),
            (r"TRUNCATE\s+TABLE", Critical),
            (r"eval\(", High),
            (r"exec\(", High),
            (r"__import__", High),
            (r"os\.remove", Medium),
            (r"os\.unlink", Medium),
        ]
        .into_iter()
        .map(|(pattern, risk)| (Regex::new(pattern).expect("static dangerous pattern is valid regex"), risk))
        .collect()
    });
    &PATTERNS
}

pub const PROTECTED_PATHS: &[&str] = &[
    "deploy/**",
    "config/production/**",
    ".env*",
    "secrets/**",
    "database/migrations/**",
    "*.key",
    "*.pem",
];

/// Translates a shell-style glob (`*`, `?`) into an anchored regex, with
/// the same semantics as Python's `fnmatch.fnmatch`: `*` matches any run
/// of characters including path separators, `?` matches exactly one.
fn fnmatch(path: &str, pattern: &str) -> bool {
    let mut regex_src = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex_src.push_str(".*"),
            '?' => regex_src.push('.'),
            other => regex_src.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex_src.push('$');
    Regex::new(&regex_src).map(|re| re.is_match(path)).unwrap_or(false)
}

fn scan_content(content: &str) -> RiskLevel {
    let mut max_risk = RiskLevel::Low;
    for (pattern, risk) in dangerous_patterns() {
        if pattern.is_match(content) {
            if *risk == RiskLevel::Critical {
                return RiskLevel::Critical;
            }
            if *risk == RiskLevel::High && max_risk != RiskLevel::Critical {
                max_risk = RiskLevel::High;
            } else if *risk == RiskLevel::Medium && max_risk == RiskLevel::Low {
                max_risk = RiskLevel::Medium;
            }
        }
    }
    max_risk
}

fn risk_reason(risk: RiskLevel, action: &str) -> String {
    match risk {
        RiskLevel::Critical => {
            let truncated: String = action.chars().take(50).collect();
            format!("CRITICAL: action '{}...' matches a dangerous pattern", truncated)
        }
        RiskLevel::High => "HIGH: action requires human approval before execution".to_string(),
        RiskLevel::Medium => "MEDIUM: action should be logged and monitored".to_string(),
        RiskLevel::Low => "LOW: action appears safe".to_string(),
    }
}

const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default poll interval for [`GovernanceGateway::wait_for_approval`],
/// mirroring `DistributedLock::acquire`'s retry idiom in
/// `state/kv.rs` but on a human-scale cadence rather than a lock-contention one.
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Tagged return value for an action that must pause for a human decision.
/// Not an operational failure: a caller matches on it with `?` and the
/// orchestrator holds `state` (a snapshot of whatever was in flight) until
/// [`GovernanceGateway::resume`] is called with the same `request_id`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("action '{description}' requires human approval (request {request_id})")]
pub struct HumanInterrupt {
    pub request_id: String,
    pub risk_level: RiskLevel,
    pub description: String,
    pub state: Option<Value>,
}

/// A resolved interrupt: the final `ApprovalRequest` plus whatever state
/// snapshot was attached when the interrupt was raised.
#[derive(Debug, Clone)]
pub struct InterruptRecord {
    pub request: ApprovalRequest,
    pub state: Option<Value>,
}

struct GatewayState {
    pending_requests: HashMap<String, ApprovalRequest>,
    approval_log: Vec<ApprovalRequest>,
    request_counter: u32,
    agent_failures: HashMap<String, u32>,
    interrupted_state: HashMap<String, Value>,
}

pub struct GovernanceGateway {
    state: Mutex<GatewayState>,
}

impl Default for GovernanceGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernanceGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState {
                pending_requests: HashMap::new(),
                approval_log: Vec::new(),
                request_counter: 0,
                agent_failures: HashMap::new(),
                interrupted_state: HashMap::new(),
            }),
        }
    }

    /// Quick combined risk read over an action string, optional content,
    /// and optional affected paths. Takes the higher of content-scan risk
    /// and path-match risk.
    pub fn check_safety(&self, action: &str, content: Option<&str>, paths: Option<&[String]>) -> SafetyCheck {
        let full_content = format!("{} {}", action, content.unwrap_or(""));
        let content_risk = scan_content(&full_content);

        let mut path_risk = RiskLevel::Low;
        if let Some(paths) = paths {
            'outer: for path in paths {
                for pattern in PROTECTED_PATHS {
                    if fnmatch(path, pattern) {
                        path_risk = RiskLevel::High;
                        break 'outer;
                    }
                }
            }
        }

        let final_risk = content_risk.max(path_risk);
        let safe = matches!(final_risk, RiskLevel::Low | RiskLevel::Medium);
        let requires_hitl = matches!(final_risk, RiskLevel::High | RiskLevel::Critical);

        SafetyCheck { safe, risk_level: final_risk, requires_hitl, reason: risk_reason(final_risk, action) }
    }

    /// Whether an action requires human approval: base action-type risk,
    /// then content scan, then protected-path match, any one of which can
    /// trigger it.
    pub fn requires_approval(&self, action_type: ActionType, affected_paths: Option<&[String]>, content: Option<&str>) -> bool {
        let base_risk = high_risk_actions().get(&action_type).copied().unwrap_or(RiskLevel::Low);
        if matches!(base_risk, RiskLevel::High | RiskLevel::Critical) {
            return true;
        }

        if let Some(content) = content {
            if matches!(scan_content(content), RiskLevel::High | RiskLevel::Critical) {
                return true;
            }
        }

        if let Some(paths) = affected_paths {
            for path in paths {
                for pattern in PROTECTED_PATHS {
                    if fnmatch(path, pattern) {
                        return true;
                    }
                }
            }
        }

        false
    }

    pub fn requires_decision_approval(&self, decision_type: DecisionType) -> bool {
        let risk = high_risk_decisions().get(&decision_type).copied().unwrap_or(RiskLevel::Low);
        matches!(risk, RiskLevel::High | RiskLevel::Critical)
    }

    /// Records a failure for `agent_name`; returns `true` once the circuit
    /// trips (three strikes per the teacher's `_circuit_breaker_threshold`).
    pub fn record_agent_failure(&self, agent_name: &str) -> bool {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        let count = state.agent_failures.entry(agent_name.to_string()).or_insert(0);
        *count += 1;
        *count >= CIRCUIT_BREAKER_THRESHOLD
    }

    pub fn is_circuit_open(&self, agent_name: &str) -> bool {
        let state = self.state.lock().expect("gateway lock poisoned");
        state.agent_failures.get(agent_name).copied().unwrap_or(0) >= CIRCUIT_BREAKER_THRESHOLD
    }

    pub fn reset_circuit(&self, agent_name: &str) {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        state.agent_failures.insert(agent_name.to_string(), 0);
    }

    pub fn create_approval_request(
        &self,
        action_type: ActionType,
        description: impl Into<String>,
        affected_resources: Vec<String>,
        rationale: impl Into<String>,
        requestor: impl Into<String>,
    ) -> ApprovalRequest {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        state.request_counter += 1;
        let request_id = format!("REQ-{}-{:04}", Utc::now().format("%Y%m%d"), state.request_counter);
        let risk_level = high_risk_actions().get(&action_type).copied().unwrap_or(RiskLevel::Low);

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            risk_level,
            description: description.into(),
            affected_resources,
            rationale: rationale.into(),
            action_type: Some(action_type),
            decision_type: None,
            request_kind: ApprovalKind::Action,
            requestor: requestor.into(),
            created_at: Utc::now(),
            approved: None,
            approver: None,
            approved_at: None,
        };

        state.pending_requests.insert(request_id, request.clone());
        request
    }

    pub fn create_decision_request(
        &self,
        decision_type: DecisionType,
        description: impl Into<String>,
        affected_resources: Vec<String>,
        rationale: impl Into<String>,
        requestor: impl Into<String>,
    ) -> ApprovalRequest {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        state.request_counter += 1;
        let request_id = format!("REQ-{}-{:04}", Utc::now().format("%Y%m%d"), state.request_counter);
        let risk_level = high_risk_decisions().get(&decision_type).copied().unwrap_or(RiskLevel::Low);

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            risk_level,
            description: description.into(),
            affected_resources,
            rationale: rationale.into(),
            action_type: None,
            decision_type: Some(decision_type),
            request_kind: ApprovalKind::Decision,
            requestor: requestor.into(),
            created_at: Utc::now(),
            approved: None,
            approver: None,
            approved_at: None,
        };

        state.pending_requests.insert(request_id, request.clone());
        request
    }

    pub fn approve(&self, request_id: &str, approver: impl Into<String>) -> bool {
        self.resolve(request_id, true, approver)
    }

    pub fn reject(&self, request_id: &str, approver: impl Into<String>) -> bool {
        self.resolve(request_id, false, approver)
    }

    fn resolve(&self, request_id: &str, approved: bool, approver: impl Into<String>) -> bool {
        let mut state = self.state.lock().expect("gateway lock poisoned");
        let Some(mut request) = state.pending_requests.remove(request_id) else {
            return false;
        };
        request.approved = Some(approved);
        request.approver = Some(approver.into());
        request.approved_at = Some(Utc::now());
        state.approval_log.push(request);
        true
    }

    /// Tries to auto-approve using a council consensus decision. `CRITICAL`
    /// risk is never auto-approved; otherwise approval requires the
    /// consensus to have reached `AUTO_COMMIT`.
    pub fn auto_approve_with_council(&self, request_id: &str, risk_level: RiskLevel, decision_is_auto_commit: bool) -> bool {
        if risk_level == RiskLevel::Critical {
            return false;
        }
        if decision_is_auto_commit {
            return self.approve(request_id, "council_auto_commit");
        }
        false
    }

    pub fn get_pending_requests(&self) -> Vec<ApprovalRequest> {
        let state = self.state.lock().expect("gateway lock poisoned");
        state.pending_requests.values().cloned().collect()
    }

    pub fn get_approval_log(&self, limit: usize) -> Vec<ApprovalRequest> {
        let state = self.state.lock().expect("gateway lock poisoned");
        let start = state.approval_log.len().saturating_sub(limit);
        state.approval_log[start..].to_vec()
    }

    /// Raises a human interrupt: creates an approval request the same way
    /// `create_approval_request` does, optionally attaching a JSON snapshot
    /// of whatever state needs to survive until a human resolves it, and
    /// returns the tagged [`HumanInterrupt`] for the caller to propagate.
    pub fn interrupt(
        &self,
        action_type: ActionType,
        description: impl Into<String>,
        affected_resources: Vec<String>,
        rationale: impl Into<String>,
        requestor: impl Into<String>,
        state: Option<Value>,
    ) -> HumanInterrupt {
        let request = self.create_approval_request(action_type, description, affected_resources, rationale, requestor);
        if let Some(ref state) = state {
            let mut gw = self.state.lock().expect("gateway lock poisoned");
            gw.interrupted_state.insert(request.request_id.clone(), state.clone());
        }
        HumanInterrupt {
            request_id: request.request_id,
            risk_level: request.risk_level,
            description: request.description,
            state,
        }
    }

    /// Resolves a pending interrupt. Returns `None` if `request_id` is
    /// unknown (already resolved, or never raised).
    pub fn resume(&self, request_id: &str, approved: bool, approver: impl Into<String>) -> Option<InterruptRecord> {
        let state_snapshot = {
            let mut gw = self.state.lock().expect("gateway lock poisoned");
            gw.interrupted_state.remove(request_id)
        };
        if !self.resolve(request_id, approved, approver) {
            return None;
        }
        let request = {
            let gw = self.state.lock().expect("gateway lock poisoned");
            gw.approval_log.iter().rev().find(|r| r.request_id == request_id).cloned()
        }?;
        Some(InterruptRecord { request, state: state_snapshot })
    }

    /// Polls the approval log until `request_id` resolves or `timeout`
    /// elapses. Returns `true` only if the request was approved within the
    /// window; a timeout or rejection both return `false`.
    pub async fn wait_for_approval(&self, request_id: &str, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        loop {
            {
                let gw = self.state.lock().expect("gateway lock poisoned");
                if let Some(request) = gw.approval_log.iter().rev().find(|r| r.request_id == request_id) {
                    return request.approved.unwrap_or(false);
                }
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(APPROVAL_POLL_INTERVAL.min(timeout)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnmatch_matches_glob_star() {
        assert!(fnmatch("secrets/db.key", "secrets/**"));
        assert!(fnmatch(".env.local", ".env*"));
        assert!(fnmatch("id_rsa.pem", "*.pem"));
        assert!(!fnmatch("src/main.rs", "secrets/**"));
    }

    #[test]
    fn test_check_safety_flags_dangerous_command() {
        let gateway = GovernanceGateway::new();
        let result = gateway.check_safety("rm -rf /data", None, None);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(!result.safe);
        assert!(result.requires_hitl);
    }

    #[test]
    fn test_check_safety_flags_protected_path() {
        let gateway = GovernanceGateway::new();
        let result = gateway.check_safety("update config", None, Some(&["config/production/db.yaml".to_string()]));
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.requires_hitl);
    }

    #[test]
    fn test_check_safety_clean_action_is_safe() {
        let gateway = GovernanceGateway::new();
        let result = gateway.check_safety("update README", None, None);
        assert!(result.safe);
        assert!(!result.requires_hitl);
    }

    #[test]
    fn test_requires_approval_for_deploy() {
        let gateway = GovernanceGateway::new();
        assert!(gateway.requires_approval(ActionType::Deploy, None, None));
        assert!(!gateway.requires_approval(ActionType::FileModify, None, None));
    }

    #[test]
    fn test_requires_decision_approval() {
        let gateway = GovernanceGateway::new();
        assert!(gateway.requires_decision_approval(DecisionType::SecurityException));
        assert!(!gateway.requires_decision_approval(DecisionType::ModelSelection));
    }

    #[test]
    fn test_circuit_breaker_trips_after_threshold() {
        let gateway = GovernanceGateway::new();
        assert!(!gateway.record_agent_failure("coder"));
        assert!(!gateway.record_agent_failure("coder"));
        assert!(gateway.record_agent_failure("coder"));
        assert!(gateway.is_circuit_open("coder"));

        gateway.reset_circuit("coder");
        assert!(!gateway.is_circuit_open("coder"));
    }

    #[test]
    fn test_approve_and_reject_move_request_to_log() {
        let gateway = GovernanceGateway::new();
        let request = gateway.create_approval_request(
            ActionType::Deploy,
            "deploy v1.2.0",
            vec!["production".to_string()],
            "all tests passed",
            "system",
        );

        assert_eq!(gateway.get_pending_requests().len(), 1);
        assert!(gateway.approve(&request.request_id, "human"));
        assert!(gateway.get_pending_requests().is_empty());
        assert_eq!(gateway.get_approval_log(10).len(), 1);

        let second = gateway.create_approval_request(ActionType::Deploy, "x", vec![], "y", "system");
        assert!(gateway.reject(&second.request_id, "human"));
        assert_eq!(gateway.get_approval_log(10).len(), 2);
    }

    #[test]
    fn test_critical_risk_never_auto_approved() {
        let gateway = GovernanceGateway::new();
        let request = gateway.create_approval_request(ActionType::Database, "drop table", vec![], "x", "system");
        assert!(!gateway.auto_approve_with_council(&request.request_id, RiskLevel::Critical, true));
    }

    #[test]
    fn test_auto_approve_requires_auto_commit_decision() {
        let gateway = GovernanceGateway::new();
        let request = gateway.create_approval_request(ActionType::ConfigChange, "tweak config", vec![], "x", "system");
        assert!(!gateway.auto_approve_with_council(&request.request_id, RiskLevel::Medium, false));
        assert!(gateway.auto_approve_with_council(&request.request_id, RiskLevel::Medium, true));
    }

    #[test]
    fn test_interrupt_carries_state_until_resume() {
        let gateway = GovernanceGateway::new();
        let snapshot = serde_json::json!({"step": "CODING", "subtask": 2});
        let interrupt = gateway.interrupt(
            ActionType::Deploy,
            "deploy hotfix",
            vec!["prod".to_string()],
            "tests green",
            "orchestrator",
            Some(snapshot.clone()),
        );
        assert_eq!(interrupt.risk_level, RiskLevel::Critical);

        let record = gateway.resume(&interrupt.request_id, true, "on-call").unwrap();
        assert_eq!(record.request.approved, Some(true));
        assert_eq!(record.state, Some(snapshot));

        assert!(gateway.resume(&interrupt.request_id, true, "on-call").is_none());
    }

    #[tokio::test]
    async fn test_wait_for_approval_returns_true_once_approved() {
        let gateway = std::sync::Arc::new(GovernanceGateway::new());
        let request = gateway.create_approval_request(ActionType::Deploy, "ship", vec![], "ok", "system");

        let waiter = gateway.clone();
        let request_id = request.request_id.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_approval(&request_id, Duration::from_secs(2)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        gateway.approve(&request.request_id, "human");

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_approval_times_out_when_never_resolved() {
        let gateway = GovernanceGateway::new();
        let resolved = gateway.wait_for_approval("REQ-does-not-exist", Duration::from_millis(50)).await;
        assert!(!resolved);
    }
}
