//! The security auditor: `Vote` only, consulted in REVIEWING whenever the
//! plan touches anything the governance gateway's risk tables would flag.
//! Grounded on `agents/adversary.rs`'s "receives only the diff and public
//! API signatures, attempts to break the implementation" red-team framing,
//! narrowed from an adversarial test-writer to a structured security vote
//! since tool-calling execution is out of scope here.

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{AgentContext, AgentIdentity, CompletionClient, LlmError, Message, MinimalVote, RiskCategory, StructuredCompletionExt, Vote};

const SYSTEM_PROMPT: &str = "You are the security auditor. You are given only the proposal \
summary and any flagged risks, never the full implementation. Look specifically for auth \
bypass, injection, unsafe deserialization, and secret handling issues. Cast a structured \
vote; tag `risks` with `sec` whenever you find one. Respond with JSON matching the \
MinimalVote schema.";

pub struct SecurityAuditor {
    identity: AgentIdentity,
    client: Arc<dyn CompletionClient>,
}

impl SecurityAuditor {
    pub fn new(model: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self { identity: AgentIdentity::new("security_auditor", SYSTEM_PROMPT, model), client }
    }
}

#[async_trait]
impl Vote for SecurityAuditor {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn vote_structured(&self, proposal: &str, context: Option<&AgentContext>) -> Result<MinimalVote, LlmError> {
        let mut user = format!("Proposal: {proposal}\n");
        if let Some(context) = context {
            user.push_str(&format!("Flagged risks: {}\n", serde_json::to_string(context).unwrap_or_default()));
        }
        let messages = vec![Message::system(self.identity.system_prompt.clone()), Message::user(user)];
        self.client.structured_completion(&messages, Some(&self.identity.model)).await
    }
}

/// Whether a plan's risks warrant pulling the security auditor into
/// REVIEWING, per spec §4.5's reviewer roster being "reviewer, architect,
/// coder" by default with specialists added when relevant.
pub fn plan_risks_warrant_audit(risks: &[String]) -> bool {
    risks.iter().any(|r| {
        let lower = r.to_lowercase();
        lower.contains("auth") || lower.contains("secret") || lower.contains("security") || lower.contains("inject")
    })
}

pub fn vote_has_security_flag(vote: &MinimalVote) -> bool {
    vote.risks.contains(&RiskCategory::Security)
}
