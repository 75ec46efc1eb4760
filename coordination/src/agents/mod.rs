//! Agent identity and the capability-set interface (`Think`/`Vote`/`Execute`)
//! every deliberation participant implements.
//!
//! `AgentIdentity` carries the stable data (name, system_prompt, model,
//! allow_delegation, allowed_agents, max_delegation_depth); the capability
//! methods live on three separate async traits rather than one abstract
//! base class, so a participant can implement only the capabilities it
//! actually offers instead of stubbing out the rest.

pub mod llm;
pub mod vote;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use llm::{CompletionClient, LlmError, Message, ScriptedClient, StructuredCompletionExt};
pub use vote::{MinimalThinkResult, MinimalVote, PlanSuggestion, RiskCategory, VoteDecision};

/// Stable identity and delegation policy for one agent. The capability
/// methods themselves live on the `Think`/`Vote`/`Execute` traits below
/// rather than on this struct, so `AgentIdentity` can be shared freely
/// (e.g. by the registry and the delegation manager) without borrowing the
/// trait object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub system_prompt: String,
    pub model: String,
    pub allow_delegation: bool,
    pub allowed_agents: Vec<String>,
    pub max_delegation_depth: usize,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
            allow_delegation: false,
            allowed_agents: Vec::new(),
            max_delegation_depth: 3,
        }
    }

    pub fn with_delegation(mut self, allowed_agents: Vec<String>, max_depth: usize) -> Self {
        self.allow_delegation = true;
        self.allowed_agents = allowed_agents;
        self.max_delegation_depth = max_depth;
        self
    }
}

/// One entry in an agent's interaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of `execute`: whether it succeeded, free-text output, and any
/// changes made or errors hit along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    pub output: String,
    pub changes_made: Vec<String>,
    pub errors: Vec<String>,
}

impl ExecuteResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            changes_made: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            changes_made: Vec::new(),
            errors: vec![error.into()],
        }
    }
}

/// Free-form context passed alongside a task/proposal — thin wrapper over
/// the wire map the LLM boundary expects so call sites don't pass bare
/// `HashMap<String, serde_json::Value>` around.
pub type AgentContext = HashMap<String, serde_json::Value>;

/// An agent that can analyze a task and produce a structured plan input.
#[async_trait::async_trait]
pub trait Think: Send + Sync {
    fn identity(&self) -> &AgentIdentity;

    async fn think_structured(
        &self,
        task: &str,
        context: Option<&AgentContext>,
    ) -> Result<MinimalThinkResult, LlmError>;
}

/// An agent that can cast a structured vote on a proposal.
#[async_trait::async_trait]
pub trait Vote: Send + Sync {
    fn identity(&self) -> &AgentIdentity;

    async fn vote_structured(
        &self,
        proposal: &str,
        context: Option<&AgentContext>,
    ) -> Result<MinimalVote, LlmError>;
}

/// An agent that can carry out a task, optionally against a plan.
#[async_trait::async_trait]
pub trait Execute: Send + Sync {
    fn identity(&self) -> &AgentIdentity;

    async fn execute(
        &self,
        task: &str,
        plan: Option<&AgentContext>,
    ) -> Result<ExecuteResult, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_with_delegation() {
        let id = AgentIdentity::new("architect", "you plan things", "claude")
            .with_delegation(vec!["coder".to_string()], 2);
        assert!(id.allow_delegation);
        assert_eq!(id.max_delegation_depth, 2);
        assert_eq!(id.allowed_agents, vec!["coder".to_string()]);
    }

    #[test]
    fn test_execute_result_constructors() {
        let ok = ExecuteResult::ok("done");
        assert!(ok.success);
        assert!(ok.errors.is_empty());

        let failed = ExecuteResult::failed("boom");
        assert!(!failed.success);
        assert_eq!(failed.errors, vec!["boom".to_string()]);
    }
}
