//! Multi-agent coordination: a shared transcript, a pluggable selection policy, and a
//! termination condition evaluated after every turn.
//!
//! # Architecture
//!
//! ```text
//! run_stream(task)
//!   seed shared buffer with task as a User message
//!   loop up to max_iterations:
//!     policy.select(agent_descriptors, buffer) -> SelectionDecision
//!     route buffered messages the selected agent hasn't seen into its own context
//!     agent.run(None) for one turn -> new messages appended to buffer
//!     policy.record_turn(decision, new_messages)
//!     termination.should_terminate(buffer-as-context)? -> break
//!     policy.is_done()? -> break
//!   emit OrchestrationResponse
//! ```
//!
//! `drive()` uses a "remove agent from the map, mutate, reinsert" pattern to run a turn
//! on the selected agent without fighting the borrow checker over `&mut self` plus a
//! `HashMap<String, Agent>`. `RoundRobinPolicy`, `AiSelectedPolicy`, and `PlanBasedPolicy`
//! are the three selection strategies; see `DESIGN.md` for how each one is grounded.

pub mod ai_selected;
pub mod plan_based;
pub mod round_robin;

pub use ai_selected::AiSelectedPolicy;
pub use plan_based::{PlanBasedPolicy, PlanStep};
pub use round_robin::RoundRobinPolicy;

use crate::context::AgentContext;
use crate::agent::Agent;
use crate::termination::TerminationCondition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity an orchestrator exposes to its selection policy — enough to build a
/// selection prompt without handing the policy a live `&Agent`.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
}

/// One policy's verdict for who runs next.
#[derive(Debug, Clone)]
pub struct SelectionDecision {
    pub next_agent: String,
    pub confidence: f64,
    pub rationale: String,
}

/// Chooses which agent runs next. `RoundRobinPolicy`, `AiSelectedPolicy`, and
/// `PlanBasedPolicy` are the three built-in strategies; a caller may supply a
/// custom one (e.g. for tests) by implementing this trait directly.
#[async_trait]
pub trait SelectionPolicy: Send + Sync {
    async fn select(
        &mut self,
        agents: &[AgentDescriptor],
        transcript: &[crate::message::Message],
    ) -> SelectionDecision;

    /// Called once the selected agent's turn has produced its messages. Stateful
    /// policies (plan-based progress tracking, ai-selected diversity tallies) override
    /// this; stateless ones (round robin) leave it as a no-op.
    async fn record_turn(
        &mut self,
        decision: &SelectionDecision,
        produced: &[crate::message::Message],
    ) {
        let _ = (decision, produced);
    }

    /// True once the policy itself considers the orchestration complete (e.g. a
    /// plan-based policy that has assessed every step), independent of the shared
    /// `TerminationCondition`.
    fn is_done(&self) -> bool {
        false
    }

    /// Orchestrator-specific metadata surfaced on the terminal `OrchestrationResponse`
    /// (selection history, agent diversity, plan progress, ...).
    fn pattern_metadata(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

/// Terminal result of an orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestrationResponse {
    pub messages: Vec<crate::message::Message>,
    pub final_result: String,
    pub stop_message: String,
    pub pattern_metadata: serde_json::Value,
}

/// One item of an orchestrator's event stream, mirroring [`crate::agent::Event`]'s
/// tagged-variant shape at the multi-agent level.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    AgentTurnStart { agent_name: String },
    AgentTurnEnd { agent_name: String, message_count: usize },
    Message(crate::message::Message),
    Error(String),
    Response(OrchestrationResponse),
}

pub type OrchestrationEventReceiver = mpsc::Receiver<OrchestrationEvent>;

/// Coordinates a fixed set of named agents under a [`SelectionPolicy`] and a
/// [`TerminationCondition`].
pub struct Orchestrator {
    descriptors: Vec<AgentDescriptor>,
    agents: HashMap<String, Agent>,
    policy: Box<dyn SelectionPolicy>,
    termination: Arc<dyn TerminationCondition>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(policy: Box<dyn SelectionPolicy>, termination: Arc<dyn TerminationCondition>) -> Self {
        Self {
            descriptors: Vec::new(),
            agents: HashMap::new(),
            policy,
            termination,
            max_iterations: 20,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Registers an agent under `name` with a `description` the selection policy may
    /// use in its prompt. Agents run in registration order for `RoundRobinPolicy`.
    pub fn with_agent(mut self, name: impl Into<String>, description: impl Into<String>, agent: Agent) -> Self {
        let name = name.into();
        self.descriptors.push(AgentDescriptor {
            name: name.clone(),
            description: description.into(),
        });
        self.agents.insert(name, agent);
        self
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    /// Synchronous terminal form: drains [`run_stream`](Self::run_stream).
    pub async fn run(&mut self, task: impl Into<String>) -> OrchestrationResponse {
        let mut rx = self.run_stream(task).await;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let OrchestrationEvent::Response(response) = event {
                last = Some(response);
            }
        }
        last.expect("run_stream always emits a terminal Response")
    }

    pub async fn run_stream(&mut self, task: impl Into<String>) -> OrchestrationEventReceiver {
        let mut events = Vec::new();
        let response = self.drive(task.into(), &mut events).await;
        events.push(OrchestrationEvent::Response(response));

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

    async fn drive(&mut self, task: String, events: &mut Vec<OrchestrationEvent>) -> OrchestrationResponse {
        let mut buffer: Vec<crate::message::Message> = vec![crate::message::Message::user(task, "user")];
        events.push(OrchestrationEvent::Message(buffer[0].clone()));
        let mut cursors: HashMap<String, usize> = HashMap::new();
        let mut stop_message = "max_iterations reached".to_string();

        for _ in 0..self.max_iterations {
            let decision = self.policy.select(&self.descriptors, &buffer).await;
            let agent_name = if self.agents.contains_key(&decision.next_agent) {
                decision.next_agent.clone()
            } else {
                self.descriptors
                    .first()
                    .map(|d| d.name.clone())
                    .unwrap_or_default()
            };

            let Some(mut agent) = self.agents.remove(&agent_name) else {
                events.push(OrchestrationEvent::Error(format!(
                    "selected agent '{agent_name}' is not registered"
                )));
                break;
            };

            events.push(OrchestrationEvent::AgentTurnStart {
                agent_name: agent_name.clone(),
            });

            let cursor = cursors.get(&agent_name).copied().unwrap_or(0);
            for msg in &buffer[cursor..] {
                agent.context_mut().push(msg.clone());
            }
            let before = agent.context().messages().len();

            agent.run(None).await;

            let produced: Vec<crate::message::Message> =
                agent.context().messages()[before.min(agent.context().messages().len())..].to_vec();
            cursors.insert(agent_name.clone(), agent.context().messages().len());

            events.push(OrchestrationEvent::AgentTurnEnd {
                agent_name: agent_name.clone(),
                message_count: produced.len(),
            });
            for msg in &produced {
                events.push(OrchestrationEvent::Message(msg.clone()));
            }
            buffer.extend(produced.iter().cloned());
            self.agents.insert(agent_name, agent);

            self.policy.record_turn(&decision, &produced).await;

            let mut probe = AgentContext::new();
            for msg in &buffer {
                probe.push(msg.clone());
            }
            if self.termination.should_terminate(&probe) {
                stop_message = self.termination.reason();
                break;
            }
            if self.policy.is_done() {
                stop_message = "selection policy signalled completion".to_string();
                break;
            }
        }

        let final_result = buffer
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.content().to_string())
            .unwrap_or_default();

        OrchestrationResponse {
            messages: buffer,
            final_result,
            stop_message,
            pattern_metadata: self.policy.pattern_metadata(),
        }
    }
}
