//! Scoring harness for models, agents, and orchestrations: a [`target::Target`] produces
//! a [`target::Trajectory`], a [`judge::Judge`] scores it, and [`runner::EvalRunner`]
//! drives a batch of [`runner::EvalTask`]s across both.

pub mod judge;
pub mod runner;
pub mod target;

pub use judge::{CompositeJudge, ContainsJudge, ExactMatchJudge, Extractor, FuzzyMatchJudge, Judge, LLMEvalJudge, Score};
pub use runner::{EvalResult, EvalRunner, EvalTask};
pub use target::{AgentTarget, ModelTarget, OrchestratorTarget, Target, Trajectory};
