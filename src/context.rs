//! Mutable conversation state owned by a single logical execution.
//!
//! [`AgentContext`] is the central piece of shared mutable state: the agent loop
//! appends messages and usage to it, middlewares read and sometimes mutate it, and the
//! approval protocol is entirely expressed as fields on it rather than as a side
//! channel. It owns a single client/history pair plus approval state and a
//! role-agnostic metadata bag.

use crate::client::Usage;
use crate::message::{Message, ToolApprovalRequest};
use serde_json::Value;
use std::collections::HashMap;

/// Conversation state for one logical agent execution.
///
/// # Example
///
/// ```
/// use agentloom::context::AgentContext;
/// use agentloom::message::Message;
///
/// let mut ctx = AgentContext::new();
/// ctx.push(Message::user("hi", "user"));
/// assert_eq!(ctx.messages().len(), 1);
/// assert!(!ctx.waiting_for_approval());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    messages: Vec<Message>,
    pending_approvals: Vec<ToolApprovalRequest>,
    approval_responses: HashMap<String, bool>,
    usage: Usage,
    metadata: HashMap<String, Value>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. This is the only way messages enter the context, which keeps
    /// them totally ordered by append time.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    /// Record a newly-surfaced approval request. Call sites must not record the same
    /// `call_id` twice; the agent loop's approval-collection step guards this.
    pub fn add_pending_approval(&mut self, request: ToolApprovalRequest) {
        self.pending_approvals.push(request);
    }

    pub fn pending_approvals(&self) -> &[ToolApprovalRequest] {
        &self.pending_approvals
    }

    /// Record a caller's decision for a pending approval. Supplying the same response
    /// twice has the same effect as supplying it once: the second call simply
    /// overwrites the map entry with an identical value and has no other observable
    /// side effect, since consumption of pending approvals happens by reading
    /// `approval_responses`, not by draining it.
    pub fn respond_to_approval(&mut self, request_id: impl Into<String>, approved: bool) {
        self.approval_responses.insert(request_id.into(), approved);
    }

    pub fn approval_response(&self, request_id: &str) -> Option<bool> {
        self.approval_responses.get(request_id).copied()
    }

    /// True iff there exists a pending approval request with no matching response.
    pub fn waiting_for_approval(&self) -> bool {
        self.pending_approvals
            .iter()
            .any(|req| !self.approval_responses.contains_key(&req.request_id))
    }

    /// Pending approvals that have not yet received a response.
    pub fn unanswered_approvals(&self) -> Vec<&ToolApprovalRequest> {
        self.pending_approvals
            .iter()
            .filter(|req| !self.approval_responses.contains_key(&req.request_id))
            .collect()
    }

    /// Clear resolved approvals once the loop has acted on them, keeping only requests
    /// still awaiting a response.
    pub fn clear_resolved_approvals(&mut self) {
        let responses = &self.approval_responses;
        self.pending_approvals
            .retain(|req| !responses.contains_key(&req.request_id));
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Usage counters are monotonically non-decreasing: this is the only mutator and
    /// it always adds.
    pub fn accumulate_usage(&mut self, usage: &Usage) {
        self.usage.accumulate(usage);
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Every `call_id` that has already appeared in some `Tool` message: lets the loop
    /// know which requested calls are still outstanding.
    pub fn resolved_call_ids(&self) -> std::collections::HashSet<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Tool { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRequest;

    #[test]
    fn waiting_for_approval_tracks_unanswered_requests() {
        let mut ctx = AgentContext::new();
        assert!(!ctx.waiting_for_approval());
        ctx.add_pending_approval(ToolApprovalRequest {
            request_id: "req1".into(),
            call_id: "call1".into(),
            tool_name: "delete_file".into(),
            parameters: HashMap::new(),
        });
        assert!(ctx.waiting_for_approval());
        ctx.respond_to_approval("req1", true);
        assert!(!ctx.waiting_for_approval());
    }

    #[test]
    fn idempotent_approval_response() {
        let mut ctx = AgentContext::new();
        ctx.respond_to_approval("req1", true);
        ctx.respond_to_approval("req1", true);
        assert_eq!(ctx.approval_response("req1"), Some(true));
        assert_eq!(ctx.approval_responses.len(), 1);
    }

    #[test]
    fn usage_accumulates_monotonically() {
        let mut ctx = AgentContext::new();
        ctx.accumulate_usage(&Usage {
            tokens_input: 5,
            ..Default::default()
        });
        ctx.accumulate_usage(&Usage {
            tokens_input: 3,
            ..Default::default()
        });
        assert_eq!(ctx.usage().tokens_input, 8);
    }

    #[test]
    fn resolved_call_ids_reads_tool_messages() {
        let mut ctx = AgentContext::new();
        ctx.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("c1", "calc", HashMap::new())],
            "agent",
        ));
        ctx.push(Message::tool_result("c1", "4", true, None, "calc"));
        assert!(ctx.resolved_call_ids().contains("c1"));
    }
}
