//! Integration coverage for the agent execution loop: the full model-call / tool-call /
//! context-update cycle driven through a real `ToolRegistry` and `MiddlewareChain`
//! rather than the unit-level fakes used inside `src/agent.rs`'s own tests.

use agentloom::client::{MockClient, ScriptedResponse};
use agentloom::message::ToolCallRequest;
use agentloom::middleware::{LoggingMiddleware, MiddlewareChain};
use agentloom::tool::{ApprovalMode, Parameter, ParameterType, Tool, ToolMetadata, ToolRegistry, ToolResult};
use agentloom::tools::CalculatorTool;
use agentloom::{Agent, FinishReason};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

fn calculator_call(id: &str, a: f64, b: f64, op: &str) -> ToolCallRequest {
    let mut params = HashMap::new();
    params.insert("a".to_string(), serde_json::json!(a));
    params.insert("b".to_string(), serde_json::json!(b));
    params.insert("op".to_string(), serde_json::json!(op));
    ToolCallRequest::new(id, "calculator", params)
}

#[tokio::test]
async fn calculator_task_stops_after_one_tool_round_trip() {
    let client = MockClient::scripted(
        "mock",
        vec![
            ScriptedResponse {
                content: "computing".to_string(),
                tool_calls: vec![calculator_call("call_1", 12.0, 30.0, "add")],
            },
            ScriptedResponse {
                content: "the sum is 42".to_string(),
                tool_calls: vec![],
            },
        ],
    );
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CalculatorTool::new())).unwrap();

    let mut agent = Agent::new("calc", Arc::new(client))
        .with_tools(tools)
        .with_middleware(MiddlewareChain::new().with(Arc::new(LoggingMiddleware::new("test"))));

    let response = agent.run(Some("what is 12 + 30?".to_string())).await;
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert!(response.context.messages().iter().any(|m| m.is_tool()));
    assert_eq!(response.context.usage().llm_calls, 2);
}

#[tokio::test]
async fn rejected_approval_produces_failed_tool_result_and_continues() {
    struct DeleteFile(ToolMetadata);

    #[async_trait]
    impl Tool for DeleteFile {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }
        async fn invoke(
            &self,
            _args: HashMap<String, serde_json::Value>,
        ) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
            Ok(ToolResult::success("deleted"))
        }
    }

    let client = MockClient::scripted(
        "mock",
        vec![
            ScriptedResponse {
                content: "deleting".to_string(),
                tool_calls: vec![ToolCallRequest::new("call_1", "delete_file", HashMap::new())],
            },
            ScriptedResponse {
                content: "could not delete, moving on".to_string(),
                tool_calls: vec![],
            },
        ],
    );
    let mut tools = ToolRegistry::new();
    tools
        .register(Arc::new(DeleteFile(
            ToolMetadata::new("delete_file", "deletes a file")
                .with_parameter(Parameter::new("path", ParameterType::String))
                .with_approval_mode(ApprovalMode::Always),
        )))
        .unwrap();

    let mut agent = Agent::new("deleter", Arc::new(client)).with_tools(tools);
    let first = agent.run(Some("delete it".to_string())).await;
    assert_eq!(first.finish_reason, FinishReason::NeedsApproval);

    agent.respond_to_approval(first.approval_requests[0].request_id.clone(), false);
    let second = agent.run(None).await;
    assert_eq!(second.finish_reason, FinishReason::Stop);
    let tool_msg = second.context.messages().iter().find(|m| m.is_tool()).unwrap();
    assert!(matches!(tool_msg, agentloom::Message::Tool { success: false, .. }));
}

#[tokio::test]
async fn repeated_approval_response_is_idempotent() {
    let client = MockClient::new("mock", "hi");
    let mut agent = Agent::new("a", Arc::new(client));
    agent.respond_to_approval("req-1", true);
    agent.respond_to_approval("req-1", true);
    assert_eq!(agent.context().approval_response("req-1"), Some(true));
}

#[tokio::test]
async fn cancellation_before_first_model_call_yields_empty_assistant_history() {
    let client = MockClient::new("mock", "should not be reached");
    let mut agent = Agent::new("a", Arc::new(client));
    agent.cancellation_token().cancel();
    let response = agent.run(Some("go".to_string())).await;
    assert_eq!(response.finish_reason, FinishReason::Cancelled);
    assert!(response.context.messages().iter().all(|m| !m.is_assistant()));
}

#[tokio::test]
async fn max_iterations_caps_a_runaway_tool_loop() {
    let client = MockClient::scripted(
        "mock",
        vec![ScriptedResponse {
            content: "still computing".to_string(),
            tool_calls: vec![calculator_call("call_x", 1.0, 1.0, "add")],
        }],
    );
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CalculatorTool::new())).unwrap();
    let mut agent = Agent::new("loopy", Arc::new(client))
        .with_tools(tools)
        .with_max_iterations(3);
    let response = agent.run(Some("go forever".to_string())).await;
    assert_eq!(response.finish_reason, FinishReason::MaxIterations);
}

#[tokio::test]
async fn usage_accumulated_on_context_never_decreases_across_turns() {
    let client = MockClient::new("mock", "hello");
    let mut agent = Agent::new("a", Arc::new(client));
    agent.run(Some("hi".to_string())).await;
    let after_first = agent.context().usage().clone();
    agent.run(Some("again".to_string())).await;
    let after_second = agent.context().usage();
    assert!(after_second.llm_calls >= after_first.llm_calls);
}
