//! The coder agent: `Execute` (implement one subtask) and `Vote` (a review
//! participant in REVIEWING). Grounded on `agents/coder.rs`'s worker-role
//! split (rust specialist vs. general coder) for the idea of per-subtask
//! specialization — collapsed into one model-backed `Execute` impl since the
//! concrete tool-calling loop (`rig::Agent` + file/exec tool bundles) is
//! out of scope for this runtime (spec §1's "non-goal: concrete tool
//! execution environments").

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{AgentContext, AgentIdentity, CompletionClient, Execute, ExecuteResult, LlmError, Message, MinimalVote, StructuredCompletionExt, Vote};

const SYSTEM_PROMPT: &str = "You are the coder. Implement the given subtask. If a \
`previous_failure` key is present in the plan context, it holds the traceback from \
the last attempt — fix that specific failure rather than starting over. Respond with \
a concise summary of the change you made.";

const REVIEW_PROMPT: &str = "You are the coder reviewing your own completed change from a \
quality standpoint. Cast a structured vote. Respond with JSON matching the MinimalVote schema.";

pub struct Coder {
    identity: AgentIdentity,
    client: Arc<dyn CompletionClient>,
}

impl Coder {
    pub fn new(model: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self { identity: AgentIdentity::new("coder", SYSTEM_PROMPT, model), client }
    }
}

#[async_trait]
impl Execute for Coder {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn execute(&self, task: &str, plan: Option<&AgentContext>) -> Result<ExecuteResult, LlmError> {
        let mut user = format!("Subtask: {task}\n");
        if let Some(plan) = plan {
            user.push_str(&format!("Plan context: {}\n", serde_json::to_string(plan).unwrap_or_default()));
        }
        let messages = vec![Message::system(self.identity.system_prompt.clone()), Message::user(user)];
        let output = self.client.completion(&messages, Some(&self.identity.model), None, None).await?;
        Ok(ExecuteResult::ok(output))
    }
}

#[async_trait]
impl Vote for Coder {
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
