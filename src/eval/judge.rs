//! Scoring strategies for a completed [`super::target::Trajectory`].

use super::target::Trajectory;
use crate::client::{ChatCompletionClient, OutputFormat};
use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of judging one trajectory: an overall 0..10 score, per-dimension breakdowns,
/// free-text reasoning per dimension, and the trajectory that was judged (carried along
/// so a runner can report task + messages + score together without re-threading state).
#[derive(Debug, Clone)]
pub struct Score {
    pub overall: f64,
    pub dimensions: HashMap<String, f64>,
    pub reasoning: HashMap<String, String>,
    pub trajectory: Trajectory,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score;
}

/// An answer-extraction strategy: reference-based judges need one canonical string out
/// of a multi-message trajectory before they can compare it to `expected_output`.
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    LastContent,
    LastAssistant,
    AllAssistant,
    LastNonEmpty,
}

impl Extractor {
    pub fn extract(&self, messages: &[Message]) -> String {
        match self {
            Extractor::LastContent => messages.last().map(|m| m.content().to_string()).unwrap_or_default(),
            Extractor::LastAssistant => messages
                .iter()
                .rev()
                .find(|m| m.is_assistant())
                .map(|m| m.content().to_string())
                .unwrap_or_default(),
            Extractor::AllAssistant => messages
                .iter()
                .filter(|m| m.is_assistant())
                .map(|m| m.content())
                .collect::<Vec<_>>()
                .join("\n"),
            Extractor::LastNonEmpty => messages
                .iter()
                .rev()
                .map(|m| m.content())
                .find(|c| !c.trim().is_empty())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn single_score(overall: f64, dimension: &str, reasoning: String, trajectory: Trajectory) -> Score {
    let mut dimensions = HashMap::new();
    dimensions.insert(dimension.to_string(), overall);
    let mut reasons = HashMap::new();
    reasons.insert(dimension.to_string(), reasoning);
    Score {
        overall,
        dimensions,
        reasoning: reasons,
        trajectory,
    }
}

pub struct ExactMatchJudge {
    pub extractor: Extractor,
}

impl ExactMatchJudge {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Judge for ExactMatchJudge {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score {
        let actual = self.extractor.extract(&trajectory.messages);
        let matched = expected_output.is_some_and(|expected| expected == actual);
        single_score(
            if matched { 10.0 } else { 0.0 },
            "exact_match",
            format!("expected={:?} actual={:?}", expected_output, actual),
            trajectory,
        )
    }
}

/// Character-trigram Jaccard similarity, thresholded. Hand-rolled rather than pulling
/// in an edit-distance crate for something this small.
fn trigram_similarity(a: &str, b: &str) -> f64 {
    fn trigrams(s: &str) -> std::collections::HashSet<String> {
        let chars: Vec<char> = s.to_lowercase().chars().collect();
        if chars.len() < 3 {
            return std::collections::HashSet::from([chars.iter().collect()]);
        }
        chars.windows(3).map(|w| w.iter().collect()).collect()
    }
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

pub struct FuzzyMatchJudge {
    pub extractor: Extractor,
    pub threshold: f64,
}

impl FuzzyMatchJudge {
    pub fn new(extractor: Extractor, threshold: f64) -> Self {
        Self { extractor, threshold }
    }
}

#[async_trait]
impl Judge for FuzzyMatchJudge {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score {
        let actual = self.extractor.extract(&trajectory.messages);
        let similarity = expected_output.map(|expected| trigram_similarity(expected, &actual)).unwrap_or(0.0);
        let matched = similarity >= self.threshold;
        single_score(
            if matched { 10.0 * similarity } else { 0.0 },
            "fuzzy_match",
            format!("similarity={similarity:.3} threshold={}", self.threshold),
            trajectory,
        )
    }
}

pub struct ContainsJudge {
    pub extractor: Extractor,
}

impl ContainsJudge {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Judge for ContainsJudge {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score {
        let actual = self.extractor.extract(&trajectory.messages);
        let matched = expected_output.is_some_and(|expected| actual.contains(expected));
        single_score(
            if matched { 10.0 } else { 0.0 },
            "contains",
            format!("looked for {:?} in {:?}", expected_output, actual),
            trajectory,
        )
    }
}

fn llm_eval_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "dimensions": {"type": "object"},
            "reasoning": {"type": "object"},
            "overall": {"type": "number"},
        },
        "required": ["overall"],
    })
}

/// Asks a model to score the trajectory against free-text `criteria`, one dimension per
/// criterion, plus an overall 0..10 rollup.
pub struct LLMEvalJudge {
    pub client: Arc<dyn ChatCompletionClient>,
    pub criteria: Vec<String>,
    pub custom_instructions: String,
}

impl LLMEvalJudge {
    pub fn new(client: Arc<dyn ChatCompletionClient>, criteria: Vec<String>, custom_instructions: impl Into<String>) -> Self {
        Self {
            client,
            criteria,
            custom_instructions: custom_instructions.into(),
        }
    }
}

#[async_trait]
impl Judge for LLMEvalJudge {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score {
        let format = OutputFormat {
            name: "eval_score".to_string(),
            schema: llm_eval_schema(),
        };
        let transcript: String = trajectory
            .messages
            .iter()
            .map(|m| format!("[{}] {}", m.source(), m.content()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Task: {}\nExpected (if any): {}\nCriteria: {}\n{}\n\nTranscript:\n{transcript}\n\n\
             Reply with JSON {{\"overall\": float 0-10, \"dimensions\": {{criterion: float}}, \"reasoning\": {{criterion: string}}}}.",
            trajectory.task,
            expected_output.unwrap_or("(none)"),
            self.criteria.join(", "),
            self.custom_instructions,
        );

        let outcome = self.client.create(&[Message::user(prompt, "judge")], None, Some(format.clone())).await;
        let parsed = outcome.ok().and_then(|r| crate::client::parse_structured_output(r.message.content(), &format).ok());

        let overall = parsed.as_ref().and_then(|v| v.get("overall")).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let dimensions: HashMap<String, f64> = parsed
            .as_ref()
            .and_then(|v| v.get("dimensions"))
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().filter_map(|(k, v)| Some((k.clone(), v.as_f64()?))).collect())
            .unwrap_or_default();
        let reasoning: HashMap<String, String> = parsed
            .as_ref()
            .and_then(|v| v.get("reasoning"))
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string()))).collect())
            .unwrap_or_default();

        Score {
            overall,
            dimensions,
            reasoning,
            trajectory,
        }
    }
}

/// Weighted combination of several judges' overall scores. `trajectory`/`dimensions`/
/// `reasoning` from every component judge are merged, prefixed by judge index so
/// dimension names from different judges can't collide.
pub struct CompositeJudge {
    pub judges: Vec<(Box<dyn Judge>, f64)>,
}

impl CompositeJudge {
    pub fn new(judges: Vec<(Box<dyn Judge>, f64)>) -> Self {
        Self { judges }
    }
}

#[async_trait]
impl Judge for CompositeJudge {
    async fn score(&self, expected_output: Option<&str>, trajectory: Trajectory) -> Score {
        let total_weight: f64 = self.judges.iter().map(|(_, w)| w).sum();
        let mut overall = 0.0;
        let mut dimensions = HashMap::new();
        let mut reasoning = HashMap::new();

        for (idx, (judge, weight)) in self.judges.iter().enumerate() {
            let component = judge.score(expected_output, trajectory.clone()).await;
            let normalized_weight = if total_weight == 0.0 { 0.0 } else { weight / total_weight };
            overall += component.overall * normalized_weight;
            for (k, v) in component.dimensions {
                dimensions.insert(format!("{idx}:{k}"), v);
            }
            for (k, v) in component.reasoning {
                reasoning.insert(format!("{idx}:{k}"), v);
            }
        }

        Score {
            overall,
            dimensions,
            reasoning,
            trajectory,
        }
    }
}
