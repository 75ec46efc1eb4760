//! The blind reviewer: `Vote` only, no `Execute`/`Think` capability.
//! Grounded on `agents/reviewer.rs`'s "blind reviewer — NO tools, only sees
//! a diff passed via prompt" design, retargeted at the structured
//! `MinimalVote` contract instead of a PASS/FAIL first-line parse.

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{AgentContext, AgentIdentity, CompletionClient, LlmError, Message, MinimalVote, StructuredCompletionExt, Vote};

const SYSTEM_PROMPT: &str = "You are the blind reviewer. You see only the proposal summary, \
never the implementation context beyond what's given. Cast a structured vote. Respond with \
JSON matching the MinimalVote schema.";

pub struct Reviewer {
    identity: AgentIdentity,
    client: Arc<dyn CompletionClient>,
}

impl Reviewer {
    pub fn new(model: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self { identity: AgentIdentity::new("reviewer", SYSTEM_PROMPT, model), client }
    }
}

#[async_trait]
impl Vote for Reviewer {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn vote_structured(&self, proposal: &str, _context: Option<&AgentContext>) -> Result<MinimalVote, LlmError> {
        let messages = vec![Message::system(self.identity.system_prompt.clone()), Message::user(format!("Proposal: {proposal}"))];
        self.client.structured_completion(&messages, Some(&self.identity.model)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{ScriptedClient, VoteDecision};

    #[tokio::test]
    async fn test_reviewer_casts_a_structured_vote() {
        let client = ScriptedClient::ok(vec![r#"{"vote":3,"confidence":0.4,"risks":["maint"],"blocking_reason":"needs more tests"}"#]);
        let reviewer = Reviewer::new("qwen", Arc::new(client));
        let vote = reviewer.vote_structured("add a login endpoint", None).await.unwrap();
        assert_eq!(vote.vote, VoteDecision::Hold);
        assert_eq!(vote.blocking_reason.as_deref(), Some("needs more tests"));
    }
}
