//! Plan-based routing: a model-generated ordered plan stepped through turn by turn, with
//! a progress-evaluator model call deciding whether each step succeeded. A dynamically
//! generated [`PlanStep`] list replaces a fixed checklist, paired with a structured
//! `{ step_completed, confidence, suggested_improvements }` judgment per step (see
//! `DESIGN.md`). The planning call asks a model to produce the next unit of work from
//! agent/task descriptions, lifted from a single-agent turn to a whole-plan-up-front
//! generation.

use super::{AgentDescriptor, SelectionDecision, SelectionPolicy};
use crate::client::{ChatCompletionClient, OutputFormat};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_id: String,
    pub task: String,
    pub agent_name: String,
    pub reasoning: String,
}

fn plan_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "step_id": {"type": "string"},
                        "task": {"type": "string"},
                        "agent_name": {"type": "string"},
                        "reasoning": {"type": "string"},
                    },
                    "required": ["step_id", "task", "agent_name"],
                },
            },
        },
        "required": ["steps"],
    })
}

fn progress_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "step_completed": {"type": "boolean"},
            "confidence": {"type": "number"},
            "suggested_improvements": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["step_completed"],
    })
}

fn fallback_plan(agents: &[AgentDescriptor], task: &str) -> Vec<PlanStep> {
    agents
        .iter()
        .enumerate()
        .map(|(i, a)| PlanStep {
            step_id: format!("step_{i}"),
            task: task.to_string(),
            agent_name: a.name.clone(),
            reasoning: "fallback: one step per registered agent".to_string(),
        })
        .collect()
}

/// Stateful plan-based selection policy: generates a plan on first use, then advances
/// through it one step per turn, retrying or skipping a step once a progress evaluator
/// judges it complete or exhausted.
pub struct PlanBasedPolicy {
    client: Arc<dyn ChatCompletionClient>,
    plan: Option<Vec<PlanStep>>,
    current_step: usize,
    retries: HashMap<usize, u32>,
    max_step_retries: u32,
    steps_completed: usize,
    steps_failed: usize,
}

impl PlanBasedPolicy {
    pub fn new(client: Arc<dyn ChatCompletionClient>, max_step_retries: u32) -> Self {
        Self {
            client,
            plan: None,
            current_step: 0,
            retries: HashMap::new(),
            max_step_retries,
            steps_completed: 0,
            steps_failed: 0,
        }
    }

    async fn generate_plan(&self, agents: &[AgentDescriptor], task: &str) -> Vec<PlanStep> {
        let format = OutputFormat {
            name: "plan".to_string(),
            schema: plan_schema(),
        };
        let roster: String = agents
            .iter()
            .map(|a| format!("- {}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Produce a step-by-step plan to accomplish this task:\n{task}\n\n\
             Available agents:\n{roster}\n\n\
             Reply with JSON {{\"steps\": [{{\"step_id\", \"task\", \"agent_name\", \"reasoning\"}}]}}, \
             at least {} steps, each assigned to one of the agents above.",
            agents.len().max(1)
        );
        let outcome = self
            .client
            .create(&[Message::user(prompt, "orchestrator")], None, Some(format.clone()))
            .await;

        let parsed = outcome.ok().and_then(|r| {
            let value = crate::client::parse_structured_output(r.message.content(), &format).ok()?;
            let steps = value.get("steps")?.as_array()?.clone();
            let plan: Vec<PlanStep> = steps
                .iter()
                .filter_map(|s| {
                    Some(PlanStep {
                        step_id: s.get("step_id")?.as_str()?.to_string(),
                        task: s.get("task").and_then(|v| v.as_str()).unwrap_or(task).to_string(),
                        agent_name: s.get("agent_name")?.as_str()?.to_string(),
                        reasoning: s.get("reasoning").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    })
                })
                .filter(|s| agents.iter().any(|a| a.name == s.agent_name))
                .collect();
            if plan.is_empty() { None } else { Some(plan) }
        });

        parsed.unwrap_or_else(|| fallback_plan(agents, task))
    }

    async fn evaluate_progress(&self, step: &PlanStep, produced: &[Message]) -> (bool, f64) {
        let format = OutputFormat {
            name: "progress".to_string(),
            schema: progress_schema(),
        };
        let transcript: String = produced
            .iter()
            .map(|m| format!("[{}] {}", m.source(), m.content()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Plan step '{}' ({}) assigned to agent '{}'. The agent produced:\n{transcript}\n\n\
             Reply with JSON {{\"step_completed\": bool, \"confidence\": float, \"suggested_improvements\": []}}.",
            step.step_id, step.task, step.agent_name
        );
        let outcome = self
            .client
            .create(&[Message::user(prompt, "orchestrator")], None, Some(format.clone()))
            .await;

        outcome
            .ok()
            .and_then(|r| crate::client::parse_structured_output(r.message.content(), &format).ok())
            .map(|v| {
                (
                    v.get("step_completed").and_then(|b| b.as_bool()).unwrap_or(true),
                    v.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.5),
                )
            })
            .unwrap_or((true, 0.0))
    }
}

#[async_trait]
impl SelectionPolicy for PlanBasedPolicy {
    async fn select(&mut self, agents: &[AgentDescriptor], transcript: &[Message]) -> SelectionDecision {
        if self.plan.is_none() {
            let task = transcript
                .first()
                .map(|m| m.content().to_string())
                .unwrap_or_default();
            self.plan = Some(self.generate_plan(agents, &task).await);
        }
        let plan = self.plan.as_ref().unwrap();
        let idx = self.current_step.min(plan.len().saturating_sub(1));
        let step = &plan[idx];
        SelectionDecision {
            next_agent: step.agent_name.clone(),
            confidence: 1.0,
            rationale: step.reasoning.clone(),
        }
    }

    async fn record_turn(&mut self, _decision: &SelectionDecision, produced: &[Message]) {
        let Some(plan) = self.plan.clone() else { return };
        if self.current_step >= plan.len() {
            return;
        }
        let step = &plan[self.current_step];
        let (completed, _confidence) = self.evaluate_progress(step, produced).await;

        if completed {
            self.steps_completed += 1;
            self.current_step += 1;
        } else {
            let retry_count = self.retries.entry(self.current_step).or_insert(0);
            *retry_count += 1;
            if *retry_count > self.max_step_retries {
                self.steps_failed += 1;
                self.current_step += 1;
            }
        }
    }

    fn is_done(&self) -> bool {
        self.plan.as_ref().is_some_and(|p| self.current_step >= p.len())
    }

    fn pattern_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "plan": self.plan.as_ref().map(|p| p.iter().map(|s| serde_json::json!({
                "step_id": s.step_id,
                "task": s.task,
                "agent_name": s.agent_name,
                "reasoning": s.reasoning,
            })).collect::<Vec<_>>()),
            "current_step": self.current_step,
            "steps_completed": self.steps_completed,
            "steps_failed": self.steps_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;

    fn descriptors() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor { name: "researcher".into(), description: "finds facts".into() },
            AgentDescriptor { name: "writer".into(), description: "writes prose".into() },
            AgentDescriptor { name: "reviewer".into(), description: "reviews drafts".into() },
        ]
    }

    #[tokio::test]
    async fn generates_plan_covering_every_agent_when_model_is_uncooperative() {
        let client = MockClient::new("m", "not json at all");
        let mut policy = PlanBasedPolicy::new(Arc::new(client), 1);
        let decision = policy.select(&descriptors(), &[Message::user("write a guide", "user")]).await;
        assert_eq!(decision.next_agent, "researcher");
        let meta = policy.pattern_metadata();
        assert_eq!(meta["plan"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn advances_on_completed_step_and_retries_on_failure() {
        let client = MockClient::scripted(
            "m",
            vec![
                r#"{"steps":[{"step_id":"s1","task":"research","agent_name":"researcher","reasoning":"first"}]}"#.into(),
                r#"{"step_completed": false, "confidence": 0.2, "suggested_improvements": ["dig deeper"]}"#.into(),
                r#"{"step_completed": true, "confidence": 0.9, "suggested_improvements": []}"#.into(),
            ],
        );
        let mut policy = PlanBasedPolicy::new(Arc::new(client), 2);
        let one_agent = vec![descriptors()[0].clone()];
        policy.select(&one_agent, &[Message::user("task", "user")]).await;
        policy.record_turn(&SelectionDecision { next_agent: "researcher".into(), confidence: 1.0, rationale: String::new() }, &[]).await;
        assert_eq!(policy.current_step, 0, "failed step should not advance");
        policy.record_turn(&SelectionDecision { next_agent: "researcher".into(), confidence: 1.0, rationale: String::new() }, &[]).await;
        assert_eq!(policy.current_step, 1, "completed step should advance");
        assert!(policy.is_done());
    }
}
