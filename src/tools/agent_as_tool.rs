//! Wraps a nested [`Agent`] as a callable [`Tool`]: invoking it hands a sub-task off
//! to another agent and surfaces that agent's final assistant text as the tool result.

use crate::agent::{Agent, FinishReason};
use crate::context::AgentContext;
use crate::tool::{Tool, ToolMetadata, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::Mutex;

/// A [`Tool`] backed by a nested [`Agent`]. Each invocation resets the nested agent
/// to a fresh [`AgentContext`] before running it, so successive calls never see one
/// another's conversation state; the agent is otherwise reused (same client, tools,
/// middleware) across calls rather than rebuilt every time.
pub struct AgentAsToolWrapper {
    metadata: ToolMetadata,
    agent: Mutex<Agent>,
    task_parameter: String,
}

impl AgentAsToolWrapper {
    /// The sub-task text is read from the `"task"` argument by default; see
    /// [`with_task_parameter`](Self::with_task_parameter) to use a different name.
    pub fn new(metadata: ToolMetadata, agent: Agent) -> Self {
        Self {
            metadata,
            agent: Mutex::new(agent),
            task_parameter: "task".to_string(),
        }
    }

    pub fn with_task_parameter(mut self, name: impl Into<String>) -> Self {
        self.task_parameter = name.into();
        self
    }
}

#[async_trait]
impl Tool for AgentAsToolWrapper {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn invoke(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let task = args
            .get(&self.task_parameter)
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut agent = self.agent.lock().await;
        *agent.context_mut() = AgentContext::new();
        let response = agent.run(task).await;

        match response.finish_reason {
            FinishReason::Stop => {
                let text = response
                    .context
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .map(|m| m.content().to_string())
                    .unwrap_or_default();
                Ok(ToolResult::success(text))
            }
            other => Ok(ToolResult::failure(format!(
                "nested agent did not reach a normal stop: {other:?}"
            ))),
        }
    }
}
