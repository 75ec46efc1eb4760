//! Delegation Manager: tracks delegation chains between agents, enforces
//! depth limits, and guards against circular delegation.
//!
//! The chain is a plain `Vec<String>` of agent names; a `thiserror` leaf
//! enum (see `state/checkpoint_store.rs`'s `StoreError` for the same
//! convention) distinguishes the three ways a delegation can be rejected
//! rather than a single opaque error.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::agents::{AgentContext, AgentIdentity, Execute, ExecuteResult};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStatus {
    Success,
    Failed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub task: String,
    pub from_agent: String,
    pub to_agent: String,
    pub depth: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DelegationResult {
    pub request: DelegationRequest,
    pub status: DelegationStatus,
    pub result: Option<ExecuteResult>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("delegation depth {current} >= max depth {max}")]
    MaxDepthExceeded { current: usize, max: usize },

    #[error("delegation not allowed: {0}")]
    NotAllowed(String),

    #[error("circular delegation detected: {chain} -> {attempted}")]
    CircularDelegation { chain: String, attempted: String },

    #[error("target agent '{0}' is not registered for execution")]
    TargetNotExecutable(String),
}

#[derive(Debug, Clone, Default)]
pub struct DelegationStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub success_rate_pct: f64,
}

struct DelegationState {
    chain: Vec<String>,
    history: Vec<DelegationResult>,
}

/// Tracks and enforces the active delegation chain across the lifetime of
/// one deliberation. Holds an `Arc<AgentRegistry>` so legality checks stay
/// consistent with whatever agents are currently registered/available.
pub struct DelegationManager {
    registry: Arc<AgentRegistry>,
    global_max_depth: usize,
    state: Mutex<DelegationState>,
}

impl DelegationManager {
    pub fn new(registry: Arc<AgentRegistry>, global_max_depth: usize) -> Self {
        Self {
            registry,
            global_max_depth,
            state: Mutex::new(DelegationState { chain: Vec::new(), history: Vec::new() }),
        }
    }

    /// Delegate `task` from `from_agent` to the registered executor behind
    /// `to_agent_name`. Legality, depth, and cycle checks run in the order
    /// spec §4.4 prescribes; a rejection is recorded to history and
    /// returned as an `Err` before the chain is ever touched.
    pub async fn delegate(
        &self,
        task: &str,
        from_agent: &AgentIdentity,
        to_agent_name: &str,
        executor: &(dyn Execute + Send + Sync),
        context: Option<&AgentContext>,
    ) -> Result<DelegationResult, DelegationError> {
        let current_depth = {
            let state = self.state.lock().expect("delegation lock poisoned");
            state.chain.len()
        };

        let request = DelegationRequest {
            task: task.to_string(),
            from_agent: from_agent.name.clone(),
            to_agent: to_agent_name.to_string(),
            depth: current_depth + 1,
            created_at: Utc::now(),
        };

        let (can_delegate, reason) = self.registry.can_delegate_to(from_agent, to_agent_name);
        if !can_delegate {
            self.record_rejection(request, reason.clone());
            return Err(DelegationError::NotAllowed(reason));
        }

        let max_depth = from_agent.max_delegation_depth.min(self.global_max_depth);
        if current_depth >= max_depth {
            self.record_rejection(
                request,
                format!("delegation depth {} >= max depth {}", current_depth, max_depth),
            );
            return Err(DelegationError::MaxDepthExceeded { current: current_depth, max: max_depth });
        }

        let chain_snapshot = {
            let state = self.state.lock().expect("delegation lock poisoned");
            state.chain.clone()
        };
        if chain_snapshot.iter().any(|n| n == to_agent_name) {
            let chain = chain_snapshot.join(" -> ");
            self.record_rejection(
                request,
                format!("circular delegation detected: {} -> {}", chain, to_agent_name),
            );
            return Err(DelegationError::CircularDelegation {
                chain,
                attempted: to_agent_name.to_string(),
            });
        }

        if executor.identity().name != to_agent_name {
            return Err(DelegationError::TargetNotExecutable(to_agent_name.to_string()));
        }

        {
            let mut state = self.state.lock().expect("delegation lock poisoned");
            state.chain.push(from_agent.name.clone());
        }

        let exec_outcome = executor.execute(task, context).await;

        {
            let mut state = self.state.lock().expect("delegation lock poisoned");
            state.chain.pop();
        }

        let result = match exec_outcome {
            Ok(exec_result) => DelegationResult {
                status: if exec_result.success { DelegationStatus::Success } else { DelegationStatus::Failed },
                request,
                result: Some(exec_result),
                error: None,
                completed_at: Utc::now(),
            },
            Err(e) => DelegationResult {
                request,
                status: DelegationStatus::Failed,
                result: None,
                error: Some(e.to_string()),
                completed_at: Utc::now(),
            },
        };

        self.state.lock().expect("delegation lock poisoned").history.push(result.clone());
        Ok(result)
    }

    fn record_rejection(&self, request: DelegationRequest, error: String) {
        let result = DelegationResult {
            request,
            status: DelegationStatus::Rejected,
            result: None,
            error: Some(error),
            completed_at: Utc::now(),
        };
        self.state.lock().expect("delegation lock poisoned").history.push(result);
    }

    pub fn current_chain(&self) -> Vec<String> {
        self.state.lock().expect("delegation lock poisoned").chain.clone()
    }

    pub fn history(&self, limit: usize) -> Vec<DelegationResult> {
        let state = self.state.lock().expect("delegation lock poisoned");
        let start = state.history.len().saturating_sub(limit);
        state.history[start..].to_vec()
    }

    pub fn get_stats(&self) -> DelegationStats {
        let state = self.state.lock().expect("delegation lock poisoned");
        if state.history.is_empty() {
            return DelegationStats::default();
        }
        let success = state.history.iter().filter(|r| r.status == DelegationStatus::Success).count();
        let total = state.history.len();
        DelegationStats {
            total,
            success,
            failed: total - success,
            success_rate_pct: (success as f64 / total as f64 * 1000.0).round() / 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::LlmError;
    use async_trait::async_trait;

    struct StubExecutor {
        identity: AgentIdentity,
        result: Result<ExecuteResult, LlmError>,
    }

    #[async_trait]
    impl Execute for StubExecutor {
        fn identity(&self) -> &AgentIdentity {
            &self.identity
        }

        async fn execute(&self, _task: &str, _plan: Option<&AgentContext>) -> Result<ExecuteResult, LlmError> {
            match &self.result {
                Ok(r) => Ok(r.clone()),
                Err(_) => Err(LlmError::RequestFailed("stub failure".to_string())),
            }
        }
    }

    fn coder_identity() -> AgentIdentity {
        AgentIdentity::new("coder", "you code", "model")
    }

    fn architect_identity() -> AgentIdentity {
        AgentIdentity::new("architect", "you plan", "model").with_delegation(vec![], 3)
    }

    #[tokio::test]
    async fn test_successful_delegation_updates_history_and_chain() {
        let registry = AgentRegistry::shared();
        registry.register(coder_identity(), vec!["coding".to_string()]);

        let manager = DelegationManager::new(registry, 5);
        let executor = StubExecutor { identity: coder_identity(), result: Ok(ExecuteResult::ok("done")) };

        let result = manager
            .delegate("implement login", &architect_identity(), "coder", &executor, None)
            .await
            .unwrap();

        assert_eq!(result.status, DelegationStatus::Success);
        assert!(manager.current_chain().is_empty(), "chain restored after delegation");

        let stats = manager.get_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
    }

    #[tokio::test]
    async fn test_delegation_not_allowed_is_rejected() {
        let registry = AgentRegistry::shared();
        registry.register(coder_identity(), vec!["coding".to_string()]);

        let closed_architect = AgentIdentity::new("architect", "you plan", "model");
        let manager = DelegationManager::new(registry, 5);
        let executor = StubExecutor { identity: coder_identity(), result: Ok(ExecuteResult::ok("done")) };

        let err = manager
            .delegate("implement login", &closed_architect, "coder", &executor, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DelegationError::NotAllowed(_)));
        assert_eq!(manager.get_stats().total, 1);
    }

    #[tokio::test]
    async fn test_max_depth_exceeded() {
        let registry = AgentRegistry::shared();
        registry.register(coder_identity(), vec!["coding".to_string()]);

        let manager = DelegationManager::new(registry, 5);
        let shallow_architect = AgentIdentity::new("architect", "you plan", "model").with_delegation(vec![], 0);
        let executor = StubExecutor { identity: coder_identity(), result: Ok(ExecuteResult::ok("done")) };

        let err = manager
            .delegate("implement login", &shallow_architect, "coder", &executor, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DelegationError::MaxDepthExceeded { current: 0, max: 0 }));
    }

    #[tokio::test]
    async fn test_circular_delegation_detected() {
        let registry = AgentRegistry::shared();
        registry.register(coder_identity(), vec!["coding".to_string()]);

        let manager = DelegationManager::new(registry, 5);
        {
            let mut state = manager.state.lock().unwrap();
            state.chain.push("coder".to_string());
        }

        let executor = StubExecutor { identity: coder_identity(), result: Ok(ExecuteResult::ok("done")) };
        let err = manager
            .delegate("implement login", &architect_identity(), "coder", &executor, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DelegationError::CircularDelegation { .. }));
    }

    #[tokio::test]
    async fn test_failed_execution_recorded_as_failed() {
        let registry = AgentRegistry::shared();
        registry.register(coder_identity(), vec!["coding".to_string()]);

        let manager = DelegationManager::new(registry, 5);
        let executor = StubExecutor { identity: coder_identity(), result: Err(LlmError::RequestFailed("x".to_string())) };

        let result = manager
            .delegate("implement login", &architect_identity(), "coder", &executor, None)
            .await
            .unwrap();

        assert_eq!(result.status, DelegationStatus::Failed);
        assert!(result.error.is_some());
    }
}
