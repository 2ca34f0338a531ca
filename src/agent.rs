//! The agent execution loop: model call -> tool planning -> tool execution -> context
//! update, repeated until the model stops, a tool pauses on approval, or an iteration
//! cap is hit.
//!
//! # Architecture
//!
//! ```text
//! run_stream(task)
//!   push task as User message
//!   loop up to max_iterations:
//!     waiting_for_approval? -> emit AgentResponse(needs_approval) and stop
//!     model_call through MiddlewareChain -> Assistant message
//!     no tool_calls? -> emit AgentResponse(stop)
//!     for each tool_call: approval gate, or execute through MiddlewareChain
//!     any approvals recorded? -> loop back to the approval check
//!     otherwise append Tool messages, continue
//!   max_iterations exhausted -> emit AgentResponse(max_iterations)
//! ```
//!
//! Mandatory identity arguments go to [`Agent::new`]; everything else is layered on
//! with consuming `with_*` builders.

use crate::cancellation::CancellationToken;
use crate::client::{parse_structured_output, ChatCompletionClient, ChatCompletionResult, OutputFormat};
use crate::context::AgentContext;
use crate::error::AgentLoomError;
use crate::message::{Message, StructuredContent, ToolApprovalRequest, ToolCallRequest};
use crate::middleware::{AgentView, MiddlewareChain, MiddlewareContext, Operation};
use crate::tool::{ApprovalMode, ExecutionOutcome, ToolExecutor, ToolRegistry};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why an agent run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced a message with no further tool calls.
    Stop,
    /// `max_iterations` was reached without a natural stop.
    MaxIterations,
    /// One or more tool calls are waiting on an approval response.
    NeedsApproval,
    /// A `CancellationToken` tripped mid-run.
    Cancelled,
    /// A model or tool failure that no middleware recovered from.
    Error(String),
}

/// Terminal result of [`Agent::run`] / the last item of [`Agent::run_stream`].
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub finish_reason: FinishReason,
    pub context: AgentContext,
    pub approval_requests: Vec<ToolApprovalRequest>,
}

/// One item of an agent's event stream.
#[derive(Debug, Clone)]
pub enum Event {
    ModelCallStart,
    TokenDelta(String),
    AssistantMessage(Message),
    ToolCallStart { call_id: String, tool_name: String },
    ToolCallEnd { call_id: String, success: bool },
    ApprovalRequested(ToolApprovalRequest),
    IterationBoundary(usize),
    Error(String),
    AgentResponse(AgentResponse),
}

/// A bounded stream of agent events; a slow consumer applies backpressure rather than
/// letting production run unbounded.
pub type EventReceiver = mpsc::Receiver<Event>;

/// A model-call-and-tool-loop bound to one client, tool registry, and middleware
/// stack. Not `Clone`: `AgentContext` is owned by exactly one logical execution, and
/// an `Agent` is the thing that owns it across calls.
pub struct Agent {
    name: String,
    client: Arc<dyn ChatCompletionClient>,
    tools: ToolRegistry,
    middleware: MiddlewareChain,
    max_iterations: usize,
    cancellation: CancellationToken,
    context: AgentContext,
    output_format: Option<OutputFormat>,
}

impl Agent {
    pub fn new(name: impl Into<String>, client: Arc<dyn ChatCompletionClient>) -> Self {
        Self {
            name: name.into(),
            client,
            tools: ToolRegistry::new(),
            middleware: MiddlewareChain::new(),
            max_iterations: 10,
            cancellation: CancellationToken::new(),
            context: AgentContext::new(),
            output_format: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    /// Requests structured output matching `format` on every model call. A successful
    /// parse populates the resulting assistant message's `structured_content`; a
    /// parse failure emits an [`Event::Error`] and leaves `structured_content` unset,
    /// with the raw text still available on the message.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.context
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Record an external decision for a pending approval request; call before the next
    /// `run`/`run_stream` to let the loop resume past step 2a.
    pub fn respond_to_approval(&mut self, request_id: impl Into<String>, approved: bool) {
        self.context.respond_to_approval(request_id, approved);
    }

    fn view(&self) -> AgentView {
        AgentView {
            agent_id: self.name.clone(),
            agent_name: self.name.clone(),
        }
    }

    /// Synchronous terminal form: drains [`run_stream`](Self::run_stream) and returns
    /// its final [`AgentResponse`].
    pub async fn run(&mut self, task: Option<String>) -> AgentResponse {
        let mut rx = self.run_stream(task, false).await;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let Event::AgentResponse(response) = event {
                last = Some(response);
            }
        }
        last.expect("run_stream always emits a terminal AgentResponse")
    }

    /// The canonical streaming form. The turn runs to completion first (the agent owns
    /// `&mut self` for its whole duration, so nothing can drive it across an `.await`
    /// boundary concurrently with a consumer); the collected events are then forwarded
    /// into a bounded channel by a background task, so a slow consumer still applies
    /// real backpressure on the forwarding rather than on the turn itself.
    pub async fn run_stream(&mut self, task: Option<String>, stream_tokens: bool) -> EventReceiver {
        let mut events = Vec::new();
        let response = self.drive(task, stream_tokens, &mut events).await;
        events.push(Event::AgentResponse(response));

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn drive(
        &mut self,
        task: Option<String>,
        stream_tokens: bool,
        events: &mut Vec<Event>,
    ) -> AgentResponse {
        if let Some(task) = task {
            self.context.push(Message::user(task, "user"));
        }

        for iteration in 0..self.max_iterations {
            events.push(Event::IterationBoundary(iteration));

            if self.cancellation.is_cancelled() {
                return self.finish(FinishReason::Cancelled);
            }

            if self.context.waiting_for_approval() {
                let pending = self
                    .context
                    .unanswered_approvals()
                    .into_iter()
                    .cloned()
                    .collect();
                return AgentResponse {
                    finish_reason: FinishReason::NeedsApproval,
                    context: self.context.clone(),
                    approval_requests: pending,
                };
            }

            events.push(Event::ModelCallStart);
            let assistant = match self.call_model(stream_tokens, events).await {
                Ok(msg) => msg,
                Err(AgentLoomError::Cancelled(_)) => return self.finish(FinishReason::Cancelled),
                Err(e) => {
                    events.push(Event::Error(e.to_string()));
                    return self.finish(FinishReason::Error(e.to_string()));
                }
            };

            let tool_calls = dedupe_call_ids(assistant.tool_calls().to_vec());
            let assistant = rewrite_tool_calls(assistant, tool_calls.clone());
            self.context.push(assistant.clone());
            events.push(Event::AssistantMessage(assistant));

            if tool_calls.is_empty() {
                return self.finish(FinishReason::Stop);
            }

            let mut any_new_approval = false;
            for call in &tool_calls {
                if self.requires_fresh_approval(call) {
                    let request = ToolApprovalRequest {
                        request_id: format!("approval-{}", call.call_id),
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        parameters: call.parameters.clone(),
                    };
                    events.push(Event::ApprovalRequested(request.clone()));
                    self.context.add_pending_approval(request);
                    any_new_approval = true;
                }
            }
            if any_new_approval {
                continue;
            }

            for call in &tool_calls {
                self.execute_one_call(call, events).await;
            }
        }

        self.finish(FinishReason::MaxIterations)
    }

    fn requires_fresh_approval(&self, call: &ToolCallRequest) -> bool {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return false;
        };
        tool.metadata().approval_mode == ApprovalMode::Always
            && self.context.approval_response(&approval_request_id(&call.call_id)).is_none()
    }

    async fn execute_one_call(&mut self, call: &ToolCallRequest, events: &mut Vec<Event>) {
        events.push(Event::ToolCallStart {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
        });

        if !self.tools.contains(&call.tool_name) {
            let msg = Message::tool_result(
                call.call_id.clone(),
                "",
                false,
                Some("unknown tool".to_string()),
                &call.tool_name,
            );
            self.context.push(msg);
            events.push(Event::ToolCallEnd {
                call_id: call.call_id.clone(),
                success: false,
            });
            return;
        }

        let approved = self
            .context
            .approval_response(&approval_request_id(&call.call_id));

        let view = self.view();
        let agent_context = &self.context;
        let tools = &self.tools;
        let middleware = &self.middleware;
        let call_name = call.tool_name.clone();
        let params = call.parameters.clone();

        let ctx = MiddlewareContext::new(
            Operation::ToolCall,
            view,
            agent_context,
            serde_json::json!({ "tool_name": call_name, "parameters": params }),
        );

        let executor = ToolExecutor::new(tools);
        let outcome_json = middleware
            .run(ctx, |data| {
                let executor = &executor;
                let tool_name = data["tool_name"].as_str().unwrap_or_default().to_string();
                let params: HashMap<String, serde_json::Value> = data["parameters"]
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                Box::pin(async move {
                    match executor.execute(&tool_name, params, approved).await {
                        ExecutionOutcome::Completed(result) => Ok(serde_json::to_value(result)
                            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                                Box::new(crate::error::ValidationError::new(e.to_string()))
                            })?),
                        ExecutionOutcome::NeedsApproval => Ok(serde_json::json!({
                            "result": "", "success": false, "error": "needs_approval"
                        })),
                        ExecutionOutcome::UnknownTool => Ok(serde_json::json!({
                            "result": "", "success": false, "error": "unknown tool"
                        })),
                    }
                })
            })
            .await;

        let (content, success, error) = match outcome_json {
            Ok(value) => (
                value["result"].as_str().unwrap_or_default().to_string(),
                value["success"].as_bool().unwrap_or(false),
                value["error"].as_str().map(|s| s.to_string()),
            ),
            Err(e) => (String::new(), false, Some(e.to_string())),
        };

        self.context.push(Message::tool_result(
            call.call_id.clone(),
            content,
            success,
            error,
            &call.tool_name,
        ));
        events.push(Event::ToolCallEnd {
            call_id: call.call_id.clone(),
            success,
        });
    }

    async fn call_model(
        &self,
        stream_tokens: bool,
        events: &mut Vec<Event>,
    ) -> Result<Message, AgentLoomError> {
        let view = self.view();
        let tool_defs = self.tools.tool_definitions();
        let ctx = MiddlewareContext::new(
            Operation::ModelCall,
            view,
            &self.context,
            serialize_messages(self.context.messages()),
        );

        let client = self.client.clone();
        let tools_for_call = if tool_defs.is_empty() { None } else { Some(tool_defs) };
        let cancellation = self.cancellation.clone();
        let output_format = self.output_format.clone();

        // `data` reflects whatever the request-phase middlewares (redaction, trimming,
        // ...) did to it, not the raw context messages, so their mutations actually
        // reach the provider call.
        let result = self
            .middleware
            .run(ctx, move |data| {
                let messages = deserialize_messages(&data);
                let output_format = output_format.clone();
                Box::pin(async move {
                    tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => {
                            Err(Box::new(crate::error::CancelledError {
                                operation: "model_call".to_string(),
                            }) as Box<dyn std::error::Error + Send + Sync>)
                        }
                        outcome = client.create(&messages, tools_for_call, output_format) => {
                            let completion = outcome.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                                Box::new(crate::error::ProviderError::new(e.to_string()))
                            })?;
                            serialize_completion(&completion)
                                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e })
                        }
                    }
                })
            })
            .await;

        match result {
            Ok(value) => {
                let mut message = deserialize_message(&value);
                if let Some(format) = &self.output_format {
                    match parse_structured_output(message.content(), format) {
                        Ok(parsed) => {
                            message = attach_structured_content(message, parsed);
                        }
                        Err(e) => {
                            events.push(Event::Error(format!(
                                "structured output parse failed: {e}"
                            )));
                        }
                    }
                }
                if stream_tokens {
                    events.push(Event::TokenDelta(message.content().to_string()));
                }
                debug!("model call completed for agent '{}'", self.name);
                Ok(message)
            }
            Err(e) => {
                if e.downcast_ref::<crate::error::CancelledError>().is_some() {
                    return Err(AgentLoomError::Cancelled(crate::error::CancelledError {
                        operation: "model_call".to_string(),
                    }));
                }
                warn!("model call failed for agent '{}': {e}", self.name);
                Err(AgentLoomError::Other(e))
            }
        }
    }

    fn finish(&self, reason: FinishReason) -> AgentResponse {
        info!("agent '{}' finished with {reason:?}", self.name);
        AgentResponse {
            finish_reason: reason,
            context: self.context.clone(),
            approval_requests: self.context.unanswered_approvals().into_iter().cloned().collect(),
        }
    }
}

/// Rebuilds an assistant message with its tool_calls replaced by the already-deduped
/// list, so the recorded context reflects the renamed `call_id`s.
fn rewrite_tool_calls(message: Message, tool_calls: Vec<ToolCallRequest>) -> Message {
    match message {
        Message::Assistant {
            content,
            structured_content,
            source,
            metadata,
            ..
        } => Message::Assistant {
            content,
            structured_content,
            tool_calls,
            source,
            metadata,
        },
        other => other,
    }
}

/// Rebuilds an assistant message with `structured_content` set from a successfully
/// parsed output-format value. Non-assistant messages pass through unchanged.
fn attach_structured_content(message: Message, value: serde_json::Value) -> Message {
    match message {
        Message::Assistant {
            content,
            tool_calls,
            source,
            metadata,
            ..
        } => Message::Assistant {
            content,
            structured_content: Some(StructuredContent { value }),
            tool_calls,
            source,
            metadata,
        },
        other => other,
    }
}

fn approval_request_id(call_id: &str) -> String {
    format!("approval-{call_id}")
}

/// Renames the second and later occurrences of a duplicate `call_id` within one
/// assistant message with a deterministic `-dup{n}` suffix.
fn dedupe_call_ids(mut calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for call in &mut calls {
        let count = seen.entry(call.call_id.clone()).or_insert(0);
        if *count > 0 {
            call.call_id = format!("{}-dup{}", call.call_id, count);
        }
        *count += 1;
    }
    calls
}

/// Renders the context's transcript as the mutable request body middlewares operate
/// on, so a `PIIRedactionMiddleware` or `ContextCompactionMiddleware` mutating this
/// value actually changes what reaches [`ChatCompletionClient::create`].
fn serialize_messages(messages: &[Message]) -> serde_json::Value {
    let rendered: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            let kind = match m {
                Message::System { .. } => "system",
                Message::User { .. } => "user",
                Message::Assistant { .. } => "assistant",
                Message::Tool { .. } => "tool",
            };
            let mut value = serde_json::json!({
                "kind": kind,
                "content": m.content(),
                "source": m.source(),
            });
            if let Message::Tool { call_id, success, error, .. } = m {
                value["call_id"] = serde_json::json!(call_id);
                value["success"] = serde_json::json!(success);
                value["error"] = serde_json::json!(error);
            }
            if !m.tool_calls().is_empty() {
                value["tool_calls"] = serde_json::json!(m
                    .tool_calls()
                    .iter()
                    .map(|c| serde_json::json!({
                        "call_id": c.call_id,
                        "tool_name": c.tool_name,
                        "parameters": c.parameters,
                    }))
                    .collect::<Vec<_>>());
            }
            value
        })
        .collect();
    serde_json::json!({ "messages": rendered })
}

fn deserialize_messages(value: &serde_json::Value) -> Vec<Message> {
    value["messages"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|m| {
                    let content = m["content"].as_str().unwrap_or_default().to_string();
                    let source = m["source"].as_str().unwrap_or_default().to_string();
                    match m["kind"].as_str().unwrap_or("user") {
                        "system" => Message::system(content, source),
                        "assistant" => {
                            let tool_calls: Vec<ToolCallRequest> = m["tool_calls"]
                                .as_array()
                                .map(|calls| {
                                    calls
                                        .iter()
                                        .map(|c| {
                                            let params: HashMap<String, serde_json::Value> = c
                                                ["parameters"]
                                                .as_object()
                                                .cloned()
                                                .unwrap_or_default()
                                                .into_iter()
                                                .collect();
                                            ToolCallRequest::new(
                                                c["call_id"].as_str().unwrap_or_default(),
                                                c["tool_name"].as_str().unwrap_or_default(),
                                                params,
                                            )
                                        })
                                        .collect()
                                })
                                .unwrap_or_default();
                            Message::assistant_with_tool_calls(content, tool_calls, source)
                        }
                        "tool" => Message::tool_result(
                            m["call_id"].as_str().unwrap_or_default().to_string(),
                            content,
                            m["success"].as_bool().unwrap_or(false),
                            m["error"].as_str().map(|s| s.to_string()),
                            source,
                        ),
                        _ => Message::user(content, source),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn serialize_completion(
    completion: &ChatCompletionResult,
) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
    let tool_calls: Vec<serde_json::Value> = completion
        .message
        .tool_calls()
        .iter()
        .map(|c| {
            serde_json::json!({
                "call_id": c.call_id,
                "tool_name": c.tool_name,
                "parameters": c.parameters,
            })
        })
        .collect();
    Ok(serde_json::json!({
        "content": completion.message.content(),
        "source": completion.message.source(),
        "tool_calls": tool_calls,
        "finish_reason": format!("{:?}", completion.finish_reason),
    }))
}

fn deserialize_message(value: &serde_json::Value) -> Message {
    let content = value["content"].as_str().unwrap_or_default().to_string();
    let source = value["source"].as_str().unwrap_or("assistant").to_string();
    let tool_calls: Vec<ToolCallRequest> = value["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| {
                    let params: HashMap<String, serde_json::Value> = tc["parameters"]
                        .as_object()
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .collect();
                    ToolCallRequest::new(
                        tc["call_id"].as_str().unwrap_or_default(),
                        tc["tool_name"].as_str().unwrap_or_default(),
                        params,
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    Message::assistant_with_tool_calls(content, tool_calls, source)
}

#[allow(unused)]
fn _assert_finish_reason_clonable() {
    fn assert_impl<T: Clone>() {}
    assert_impl::<FinishReason>();
}
