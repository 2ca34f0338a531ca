//! Runnable targets an evaluation can score: a raw model, a single agent, or a whole
//! orchestration. Grounded on the pack's `eval_support.rs` pattern of wrapping whatever
//! already-built runner produces a response and a message history, then packaging
//! duration and usage alongside it for the judge to consume.

use crate::agent::Agent;
use crate::client::{ChatCompletionClient, Usage};
use crate::message::Message;
use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use std::time::Instant;

/// Everything a [`super::judge::Judge`] needs to score one run: the task, the full
/// message transcript produced, and accumulated usage.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub task: String,
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub duration_ms: u64,
}

#[async_trait]
pub trait Target: Send + Sync {
    async fn run(&mut self, task: &str) -> Trajectory;
}

/// Runs the task as a single model call with no tool loop, for judging raw model
/// quality in isolation from agent scaffolding.
pub struct ModelTarget {
    client: std::sync::Arc<dyn ChatCompletionClient>,
}

impl ModelTarget {
    pub fn new(client: std::sync::Arc<dyn ChatCompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Target for ModelTarget {
    async fn run(&mut self, task: &str) -> Trajectory {
        let start = Instant::now();
        let user_message = Message::user(task, "eval");
        let mut messages = vec![user_message.clone()];
        let mut usage = Usage::default();

        match self.client.create(&[user_message], None, None).await {
            Ok(result) => {
                usage.accumulate(&result.usage);
                messages.push(result.message);
            }
            Err(e) => {
                messages.push(Message::assistant(format!("error: {e}"), self.client.model_name()));
            }
        }

        Trajectory {
            task: task.to_string(),
            messages,
            usage,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Runs the task through one [`Agent`]'s full iteration loop.
pub struct AgentTarget {
    agent: Agent,
}

impl AgentTarget {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Target for AgentTarget {
    async fn run(&mut self, task: &str) -> Trajectory {
        let start = Instant::now();
        let before = self.agent.context().messages().len();
        self.agent.run(Some(task.to_string())).await;
        let messages = self.agent.context().messages()[before.saturating_sub(1).min(before)..].to_vec();
        Trajectory {
            task: task.to_string(),
            messages,
            usage: self.agent.context().usage().clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Runs the task through a whole multi-agent [`Orchestrator`] run.
pub struct OrchestratorTarget {
    orchestrator: Orchestrator,
}

impl OrchestratorTarget {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Target for OrchestratorTarget {
    async fn run(&mut self, task: &str) -> Trajectory {
        let start = Instant::now();
        let response = self.orchestrator.run(task.to_string()).await;
        Trajectory {
            task: task.to_string(),
            messages: response.messages,
            usage: Usage::default(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn model_target_produces_single_exchange() {
        let mut target = ModelTarget::new(Arc::new(MockClient::new("m", "18844209")));
        let trajectory = target.run("What is 545 * 34555?").await;
        assert_eq!(trajectory.messages.len(), 2);
        assert!(trajectory.messages[1].content().contains("18844209"));
    }

    #[tokio::test]
    async fn agent_target_runs_full_loop() {
        let agent = Agent::new("solver", Arc::new(MockClient::new("m", "the answer is 42")));
        let mut target = AgentTarget::new(agent);
        let trajectory = target.run("what is the answer").await;
        assert!(trajectory.messages.iter().any(|m| m.content().contains("42")));
    }
}
