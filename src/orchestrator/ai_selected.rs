//! AI-selected routing: the orchestrator itself issues a model call asking which agent
//! should run next, replacing free-text moderator replies with a structured
//! `{ next_agent, confidence, rationale }` judgment from a dedicated selector client.

use super::{AgentDescriptor, RoundRobinPolicy, SelectionDecision, SelectionPolicy};
use crate::client::{ChatCompletionClient, OutputFormat};
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

fn selection_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "next_agent": {"type": "string"},
            "confidence": {"type": "number"},
            "rationale": {"type": "string"},
        },
        "required": ["next_agent"],
    })
}

fn build_prompt(agents: &[AgentDescriptor], transcript: &[Message]) -> String {
    let roster: String = agents
        .iter()
        .map(|a| format!("- {}: {}", a.name, a.description))
        .collect::<Vec<_>>()
        .join("\n");
    let recent: String = transcript
        .iter()
        .rev()
        .take(8)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| format!("[{}] {}", m.source(), m.content()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are routing a multi-agent conversation. Available agents:\n{roster}\n\n\
         Recent transcript:\n{recent}\n\n\
         Reply with a JSON object {{\"next_agent\": string, \"confidence\": float, \"rationale\": string}} \
         naming which agent should speak next."
    )
}

fn parse_decision(text: &str, format: &OutputFormat) -> Option<SelectionDecision> {
    let value = crate::client::parse_structured_output(text, format).ok()?;
    let next_agent = value.get("next_agent")?.as_str()?.to_string();
    Some(SelectionDecision {
        next_agent,
        confidence: value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5),
        rationale: value
            .get("rationale")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
    })
}

/// Selects the next agent via a model call, falling back to round-robin whenever the
/// model names an agent that isn't registered (or the completion doesn't parse).
pub struct AiSelectedPolicy {
    client: Arc<dyn ChatCompletionClient>,
    fallback: RoundRobinPolicy,
    selection_history: Vec<String>,
    confidence_sum: f64,
    turns: u32,
}

impl AiSelectedPolicy {
    pub fn new(client: Arc<dyn ChatCompletionClient>) -> Self {
        Self {
            client,
            fallback: RoundRobinPolicy::new(),
            selection_history: Vec::new(),
            confidence_sum: 0.0,
            turns: 0,
        }
    }

    fn agent_diversity(&self) -> f64 {
        if self.selection_history.is_empty() {
            return 0.0;
        }
        let distinct: std::collections::HashSet<&String> = self.selection_history.iter().collect();
        distinct.len() as f64 / self.selection_history.len() as f64
    }
}

#[async_trait]
impl SelectionPolicy for AiSelectedPolicy {
    async fn select(&mut self, agents: &[AgentDescriptor], transcript: &[Message]) -> SelectionDecision {
        let format = OutputFormat {
            name: "agent_selection".to_string(),
            schema: selection_schema(),
        };
        let prompt = build_prompt(agents, transcript);
        let outcome = self
            .client
            .create(&[Message::user(prompt, "orchestrator")], None, Some(format.clone()))
            .await;

        let decision = outcome
            .ok()
            .and_then(|r| parse_decision(r.message.content(), &format))
            .filter(|d| agents.iter().any(|a| a.name == d.next_agent));

        let decision = match decision {
            Some(d) => d,
            None => self.fallback.select(agents, transcript).await,
        };

        self.selection_history.push(decision.next_agent.clone());
        self.confidence_sum += decision.confidence;
        self.turns += 1;
        decision
    }

    fn pattern_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "selection_history": self.selection_history,
            "agent_diversity": self.agent_diversity(),
            "average_confidence": if self.turns == 0 { 0.0 } else { self.confidence_sum / self.turns as f64 },
        })
    }
}
