//! Provider-agnostic language model client contract.
//!
//! The engine depends on [`ChatCompletionClient`] and never on a concrete vendor SDK.
//! Implementations for OpenAI, Azure, or Anthropic are external collaborators; this
//! crate ships only the trait plus [`MockClient`], the test double used throughout
//! this crate's own test suite.

use crate::message::{Message, ToolCallRequest};
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Mutex;

/// Cumulative token/call/cost accounting, shared by [`crate::context::AgentContext`]
/// and individual provider responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub duration_ms: u64,
    pub cost_estimate: f64,
}

impl Usage {
    /// Merge another usage snapshot into this one. Every field is additive, which is
    /// what keeps the monotonically-non-decreasing invariant on
    /// [`crate::context::AgentContext::usage`] trivially true.
    pub fn accumulate(&mut self, other: &Usage) {
        self.tokens_input += other.tokens_input;
        self.tokens_output += other.tokens_output;
        self.llm_calls += other.llm_calls;
        self.tool_calls += other.tool_calls;
        self.duration_ms += other.duration_ms;
        self.cost_estimate += other.cost_estimate;
    }
}

/// A tool schema advertised to the model alongside a chat request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Declares that the model should produce JSON matching this schema instead of (or in
/// addition to) free text. Providers that do not support native structured output
/// still receive this; the engine is responsible for parsing their textual completion
/// against it (see [`crate::serialization::SchemaSpec`]).
#[derive(Debug, Clone)]
pub struct OutputFormat {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

/// The full, non-streaming result of [`ChatCompletionClient::create`].
#[derive(Debug, Clone)]
pub struct ChatCompletionResult {
    pub message: Message,
    pub finish_reason: ClientFinishReason,
    pub usage: Option<Usage>,
    pub model: String,
}

/// One increment of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub content_delta: Option<String>,
    pub tool_call_chunk: Option<ToolCallRequest>,
    pub is_complete: bool,
    pub usage: Option<Usage>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Provider-agnostic chat completion client.
///
/// Implementations must be `Send + Sync` so a single client can be shared across
/// concurrently-running agents. Streaming support is optional — the default
/// `create_stream` resolves to `Ok(None)`, signalling "this provider doesn't stream,
/// fall back to `create`".
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Full request/response chat completion.
    async fn create(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
        output_format: Option<OutputFormat>,
    ) -> Result<ChatCompletionResult, Box<dyn Error + Send + Sync>>;

    /// Streaming chat completion. Returns `Ok(None)` when the provider (or this mock)
    /// doesn't support streaming.
    async fn create_stream(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
        _output_format: Option<OutputFormat>,
    ) -> Result<Option<ChunkStream>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }

    /// Identifier of the upstream model, e.g. `"gpt-4.1"`.
    fn model_name(&self) -> &str;
}

/// A scripted test double: returns a fixed response (optionally with tool calls) every
/// time `create` is invoked, and records how many times it was called.
///
/// # Example
///
/// ```
/// use agentloom::client::{ChatCompletionClient, MockClient};
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = MockClient::new("mock-model", "hello there");
/// let result = client.create(&[], None, None).await.unwrap();
/// assert_eq!(result.message.content(), "hello there");
/// assert_eq!(client.call_count(), 1);
/// # }
/// ```
pub struct MockClient {
    model: String,
    responses: Mutex<Vec<ScriptedResponse>>,
    call_count: Mutex<u64>,
}

/// A single scripted reply, which may carry tool calls.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl From<&str> for ScriptedResponse {
    fn from(content: &str) -> Self {
        Self {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }
}

impl MockClient {
    /// Always answers with the same plain-text response.
    pub fn new(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(vec![ScriptedResponse {
                content: response.into(),
                tool_calls: Vec::new(),
            }]),
            call_count: Mutex::new(0),
        }
    }

    /// Replays `responses` in order, repeating the last one once exhausted.
    pub fn scripted(model: impl Into<String>, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl ChatCompletionClient for MockClient {
    async fn create(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
        _output_format: Option<OutputFormat>,
    ) -> Result<ChatCompletionResult, Box<dyn Error + Send + Sync>> {
        let mut count = self.call_count.lock().unwrap();
        let idx = (*count) as usize;
        *count += 1;
        let responses = self.responses.lock().unwrap();
        let scripted = responses
            .get(idx)
            .or_else(|| responses.last())
            .cloned()
            .unwrap_or_else(|| ScriptedResponse::from(""));

        let finish_reason = if scripted.tool_calls.is_empty() {
            ClientFinishReason::Stop
        } else {
            ClientFinishReason::ToolCalls
        };

        Ok(ChatCompletionResult {
            message: Message::assistant_with_tool_calls(
                scripted.content,
                scripted.tool_calls,
                &self.model,
            ),
            finish_reason,
            usage: Some(Usage {
                tokens_input: 10,
                tokens_output: 10,
                llm_calls: 1,
                tool_calls: 0,
                duration_ms: 1,
                cost_estimate: 0.0,
            }),
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Best-effort recovery of a JSON value matching `output_format` out of a provider's
/// free-text completion, for providers that don't support native structured output.
pub fn parse_structured_output(
    text: &str,
    _format: &OutputFormat,
) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(text) {
        return Ok(v);
    }
    let start = text.find('{').ok_or_else(|| -> Box<dyn Error + Send + Sync> {
        Box::new(crate::error::ValidationError::new(
            "no JSON object found in completion text",
        ))
    })?;
    let end = text.rfind('}').ok_or_else(|| -> Box<dyn Error + Send + Sync> {
        Box::new(crate::error::ValidationError::new(
            "no JSON object found in completion text",
        ))
    })?;
    serde_json::from_str(&text[start..=end])
        .map_err(|e| Box::new(crate::error::ValidationError::new(e.to_string())) as Box<dyn Error + Send + Sync>)
}

#[allow(unused)]
fn _assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_records_call_count() {
        let client = MockClient::new("m", "hi");
        client.create(&[], None, None).await.unwrap();
        client.create(&[], None, None).await.unwrap();
        assert_eq!(client.call_count(), 2);
    }

    #[test]
    fn parse_structured_output_extracts_embedded_json() {
        let format = OutputFormat {
            name: "x".into(),
            schema: serde_json::json!({}),
        };
        let text = "here you go: {\"a\": 1} thanks";
        let value = parse_structured_output(text, &format).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_structured_output_errors_without_json() {
        let format = OutputFormat {
            name: "x".into(),
            schema: serde_json::json!({}),
        };
        assert!(parse_structured_output("no json here", &format).is_err());
    }
}
