//! The web researcher: `Think` only, an optional augmentation to EXPLORING
//! for tasks that reference unfamiliar libraries or APIs. Spec §4.5 marks
//! EXPLORING's LLM calls as not mandatory — this agent is what a caller
//! reaches for when they are wanted. No network access is implemented here;
//! the agent reasons over whatever the `CompletionClient` already knows,
//! consistent with spec §1's non-goal of concrete browser/tool integrations.

use std::sync::Arc;

use async_trait::async_trait;
use coordination::{AgentContext, AgentIdentity, CompletionClient, LlmError, Message, MinimalThinkResult, StructuredCompletionExt, Think};

const SYSTEM_PROMPT: &str = "You are the web researcher. Given a task, surface any relevant \
library/API background the other agents would need before planning — name the crate or \
API, note version pitfalls, and flag anything uncertain as a concern. Respond with JSON \
matching the MinimalThinkResult schema.";

pub struct WebResearcher {
    identity: AgentIdentity,
    client: Arc<dyn CompletionClient>,
}

impl WebResearcher {
    pub fn new(model: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self { identity: AgentIdentity::new("web_researcher", SYSTEM_PROMPT, model), client }
    }
}

#[async_trait]
impl Think for WebResearcher {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn think_structured(&self, task: &str, _context: Option<&AgentContext>) -> Result<MinimalThinkResult, LlmError> {
        let messages = vec![Message::system(self.identity.system_prompt.clone()), Message::user(format!("Task: {task}"))];
        self.client.structured_completion(&messages, Some(&self.identity.model)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::ScriptedClient;

    #[tokio::test]
    async fn test_research_surfaces_concerns() {
        let client = ScriptedClient::ok(vec![r#"{"suggestions":[],"concerns":["rocksdb 0.24 requires clang on the build host"],"confidence":0.6}"#]);
        let researcher = WebResearcher::new("claude", Arc::new(client));
        let result = researcher.think_structured("add an embedded checkpoint store", None).await.unwrap();
        assert_eq!(result.concerns.len(), 1);
    }
}
