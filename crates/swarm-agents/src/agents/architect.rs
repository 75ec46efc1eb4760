//! The planning/architect agent: `Think` (structured plan suggestions) and
//! `Vote` (a review participant in REVIEWING), grounded on
//! `agents/specialists.rs`'s `build_planner` — "analyzes errors and
//! produces structured JSON repair plans" — retargeted at spec §4.5's
//! `think_structured` contract instead of a tool-calling `rig::Agent`.

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{AgentContext, AgentIdentity, CompletionClient, LlmError, Message, MinimalThinkResult, MinimalVote, StructuredCompletionExt, Think, Vote};

const SYSTEM_PROMPT: &str = "You are the architect. Given a task and its history, decompose it \
into an ordered list of subtasks with a rationale each, and flag any risks. \
Respond with JSON matching the MinimalThinkResult schema.";

const REVIEW_PROMPT: &str = "You are the architect reviewing a completed change. Cast a \
structured vote on whether it should be committed. Respond with JSON matching the \
MinimalVote schema.";

pub struct Architect {
    identity: AgentIdentity,
    client: Arc<dyn CompletionClient>,
}

impl Architect {
    pub fn new(model: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self { identity: AgentIdentity::new("architect", SYSTEM_PROMPT, model), client }
    }
}

#[async_trait]
impl Think for Architect {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn think_structured(&self, task: &str, context: Option<&AgentContext>) -> Result<MinimalThinkResult, LlmError> {
        let mut user = format!("Task: {task}\n");
        if let Some(context) = context {
            user.push_str(&format!("History: {}\n", serde_json::to_string(context).unwrap_or_default()));
        }
        let messages = vec![Message::system(self.identity.system_prompt.clone()), Message::user(user)];
        self.client.structured_completion(&messages, Some(&self.identity.model)).await
    }
}

#[async_trait]
impl Vote for Architect {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn vote_structured(&self, proposal: &str, context: Option<&AgentContext>) -> Result<MinimalVote, LlmError> {
        let mut user = format!("Proposal: {proposal}\n");
        if let Some(context) = context {
            user.push_str(&format!("Context: {}\n", serde_json::to_string(context).unwrap_or_default()));
        }
        let messages = vec![Message::system(REVIEW_PROMPT), Message::user(user)];
        self.client.structured_completion(&messages, Some(&self.identity.model)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{ScriptedClient, VoteDecision};

    #[tokio::test]
    async fn test_think_structured_parses_plan_suggestions() {
        let client = ScriptedClient::ok(vec![
            r#"{"suggestions":[{"description":"add handler","rationale":"needed"}],"concerns":["touches auth"],"confidence":0.8}"#,
        ]);
        let architect = Architect::new("claude", Arc::new(client));
        let result = architect.think_structured("add a login endpoint", None).await.unwrap();
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.concerns, vec!["touches auth".to_string()]);
    }

    #[tokio::test]
    async fn test_vote_structured_parses_vote() {
        let client = ScriptedClient::ok(vec![r#"{"vote":1,"confidence":0.9,"risks":[],"blocking_reason":null}"#]);
        let architect = Architect::new("claude", Arc::new(client));
        let vote = architect.vote_structured("merge this diff", None).await.unwrap();
        assert_eq!(vote.vote, VoteDecision::Approve);
    }

    #[tokio::test]
    async fn test_malformed_response_surfaces_parse_error() {
        let client = ScriptedClient::ok(vec!["not json"]);
        let architect = Architect::new("claude", Arc::new(client));
        let result = architect.think_structured("task", None).await;
        assert!(matches!(result, Err(LlmError::ParseError(_))));
    }
}
