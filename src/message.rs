//! Typed conversation messages.
//!
//! [`Message`] is the sum type every component of this crate exchanges: the agent loop
//! appends them to an [`crate::context::AgentContext`], middlewares mutate them in
//! flight, and orchestrators interleave them across several agents. The variant carries
//! what is structurally true of that role — only `Assistant` can carry tool calls or
//! structured content, only `Tool` carries a `call_id` correlating it back to a request.

use serde_json::Value;
use std::collections::HashMap;

/// A tool call the model asked to have executed.
///
/// `call_id` is unique within a conversation and is the correlation key between this
/// request (embedded in an [`Message::Assistant`]) and the eventual [`Message::Tool`]
/// result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub parameters: HashMap<String, Value>,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// A pending human-in-the-loop approval for a tool call an agent has requested but not
/// yet executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolApprovalRequest {
    pub request_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub parameters: HashMap<String, Value>,
}

/// Structured content an assistant message carries when the model was asked to produce
/// output matching a declared schema (see [`crate::serialization::SchemaSpec`]).
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredContent {
    pub value: Value,
}

/// A single message in a conversation.
///
/// Every variant carries `source` (the producer name — an agent id, `"user"`, the
/// literal tool name, …) and `metadata`, so every message is attributable regardless
/// of role.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Instructions seeded at conversation start.
    System {
        content: String,
        source: String,
        metadata: HashMap<String, Value>,
    },
    /// External input.
    User {
        content: String,
        source: String,
        metadata: HashMap<String, Value>,
    },
    /// Model output: plain text, optional structured content, and zero or more tool
    /// call requests.
    Assistant {
        content: String,
        structured_content: Option<StructuredContent>,
        tool_calls: Vec<ToolCallRequest>,
        source: String,
        metadata: HashMap<String, Value>,
    },
    /// Result of a tool invocation, correlated by `call_id` to a prior
    /// [`ToolCallRequest`].
    Tool {
        call_id: String,
        content: String,
        success: bool,
        error: Option<String>,
        source: String,
        metadata: HashMap<String, Value>,
    },
}

impl Message {
    pub fn system(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            structured_content: None,
            tool_calls: Vec::new(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
        source: impl Into<String>,
    ) -> Self {
        Self::Assistant {
            content: content.into(),
            structured_content: None,
            tool_calls,
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        content: impl Into<String>,
        success: bool,
        error: Option<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            content: content.into(),
            success,
            error,
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    /// The producer name, regardless of variant.
    pub fn source(&self) -> &str {
        match self {
            Self::System { source, .. }
            | Self::User { source, .. }
            | Self::Assistant { source, .. }
            | Self::Tool { source, .. } => source,
        }
    }

    /// The plain-text body, regardless of variant.
    pub fn content(&self) -> &str {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        match self {
            Self::System { metadata, .. }
            | Self::User { metadata, .. }
            | Self::Assistant { metadata, .. }
            | Self::Tool { metadata, .. } => metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut HashMap<String, Value> {
        match self {
            Self::System { metadata, .. }
            | Self::User { metadata, .. }
            | Self::Assistant { metadata, .. }
            | Self::Tool { metadata, .. } => metadata,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    /// Tool calls carried by this message, empty for every variant but `Assistant`.
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_work_across_variants() {
        let msgs = vec![
            Message::system("be terse", "system"),
            Message::user("hi", "user"),
            Message::assistant("hello", "agent-1"),
            Message::tool_result("call_1", "42", true, None, "calculator"),
        ];
        for m in &msgs {
            let _ = m.source();
            let _ = m.content();
            let _ = m.metadata();
        }
        assert!(msgs[2].is_assistant());
        assert!(msgs[3].is_tool());
    }

    #[test]
    fn assistant_tool_calls_round_trip() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), Value::from(1));
        let call = ToolCallRequest::new("call_1", "calculator", params);
        let msg = Message::assistant_with_tool_calls("", vec![call.clone()], "agent-1");
        assert_eq!(msg.tool_calls(), &[call]);
    }
}
