//! The LLM boundary the core consumes: a minimal `completion`/
//! `structured_completion` surface, plus a hand-rolled scripted test double.
//!
//! Concrete provider adapters (HTTP clients for specific model APIs) are
//! deliberately not part of this crate — only the `async_trait` boundary
//! they'd implement. A scripted stub (`ScriptedClient`) is provided for
//! tests instead of pulling in a mocking framework: the trait surface is
//! small enough that canned responses in a `Vec` cover every test case
//! agents need.

use std::sync::Mutex;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    RequestFailed(String),

    #[error("response was not valid JSON for the expected schema: {0}")]
    ParseError(String),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no scripted response remaining")]
    ScriptExhausted,
}

/// One chat message on the completion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// The minimal surface the core requires from an LLM provider. Agents hold
/// an `Arc<dyn CompletionClient>`; the core never constructs a concrete
/// provider implementation itself.
///
/// Deliberately carries a single non-generic method so the trait stays
/// object-safe (`dyn CompletionClient` is how every agent holds its
/// provider). The structured-completion convenience lives on
/// [`StructuredCompletionExt`] instead, since a generic method can never be
/// part of a trait object's vtable.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Free-text completion. Implementations must not mutate `messages`.
    async fn completion(
        &self,
        messages: &[Message],
        model: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError>;
}

/// Structured completion, layered over [`CompletionClient::completion`] as a
/// blanket-implemented extension trait: the provider is expected to return
/// JSON deserializable into `T`. Implementations that support
/// response-format constraints would need a richer `CompletionClient`
/// method to take advantage of `T`'s schema; this default just parses the
/// raw text.
#[async_trait]
pub trait StructuredCompletionExt: CompletionClient {
    async fn structured_completion<T>(
        &self,
        messages: &[Message],
        model: Option<&str>,
    ) -> Result<T, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        let raw = self.completion(messages, model, None, None).await?;
        serde_json::from_str(&raw).map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

impl<C: CompletionClient + ?Sized> StructuredCompletionExt for C {}

/// A scripted client: returns pre-programmed responses in call order. Used
/// in unit tests for agents and for the orchestrator's end-to-end tests so
/// no real provider is exercised.
pub struct ScriptedClient {
    completions: Mutex<Vec<Result<String, LlmError>>>,
}

impl ScriptedClient {
    pub fn new(completions: Vec<Result<String, LlmError>>) -> Self {
        Self { completions: Mutex::new(completions) }
    }

    pub fn ok(responses: Vec<&str>) -> Self {
        Self::new(responses.into_iter().map(|r| Ok(r.to_string())).collect())
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn completion(
        &self,
        _messages: &[Message],
        _model: Option<&str>,
        _temperature: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        let mut queue = self.completions.lock().expect("scripted client lock poisoned");
        if queue.is_empty() {
            return Err(LlmError::ScriptExhausted);
        }
        queue.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Toy {
        x: u32,
    }

    #[tokio::test]
    async fn test_scripted_client_returns_in_order() {
        let client = ScriptedClient::ok(vec!["first", "second"]);
        let messages = vec![Message::user("hi")];

        let a = client.completion(&messages, None, None, None).await.unwrap();
        let b = client.completion(&messages, None, None, None).await.unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
    }

    #[tokio::test]
    async fn test_scripted_client_exhausted() {
        let client = ScriptedClient::ok(vec![]);
        let messages = vec![Message::user("hi")];
        let err = client.completion(&messages, None, None, None).await.unwrap_err();
        assert!(matches!(err, LlmError::ScriptExhausted));
    }

    #[tokio::test]
    async fn test_structured_completion_parses_json() {
        let client = ScriptedClient::ok(vec![r#"{"x": 42}"#]);
        let messages = vec![Message::user("hi")];
        let toy: Toy = client.structured_completion(&messages, None).await.unwrap();
        assert_eq!(toy, Toy { x: 42 });
    }

    #[tokio::test]
    async fn test_structured_completion_parse_error() {
        let client = ScriptedClient::ok(vec!["not json"]);
        let messages = vec![Message::user("hi")];
        let result: Result<Toy, _> = client.structured_completion(&messages, None).await;
        assert!(matches!(result, Err(LlmError::ParseError(_))));
    }
}
