//! Deterministic cyclic selection over the registered agent roster, expressed as a
//! `SelectionPolicy` so it composes with any `TerminationCondition` rather than a
//! fixed round count.

use super::{AgentDescriptor, SelectionDecision, SelectionPolicy};
use async_trait::async_trait;

pub struct RoundRobinPolicy {
    cursor: usize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionPolicy for RoundRobinPolicy {
    async fn select(
        &mut self,
        agents: &[AgentDescriptor],
        _transcript: &[crate::message::Message],
    ) -> SelectionDecision {
        let idx = self.cursor % agents.len().max(1);
        self.cursor += 1;
        SelectionDecision {
            next_agent: agents.get(idx).map(|a| a.name.clone()).unwrap_or_default(),
            confidence: 1.0,
            rationale: "round robin".to_string(),
        }
    }
}
