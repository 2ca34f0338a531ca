//! The unit of work in a workflow DAG.
//!
//! `Step` is async-trait like every other engine seam (`ChatCompletionClient`, `Tool`,
//! `Middleware`, `TerminationCondition`); `FnStep` gives callers a closure-backed
//! implementation for the common case so they don't have to write a whole struct +
//! `impl Step` for every pipeline stage.

use super::context::WorkflowContext;
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StepMetadata {
    pub name: String,
    pub description: String,
}

impl StepMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What a step receives for one execution: nothing (a root step with no declared
/// predecessors), a single predecessor's output, or an ordered list of outputs from
/// multiple predecessors (fan-in).
#[derive(Debug, Clone)]
pub enum StepInput {
    None,
    Single(Value),
    Fanned(Vec<Value>),
}

impl StepInput {
    pub fn into_value(self) -> Value {
        match self {
            StepInput::None => Value::Null,
            StepInput::Single(v) => v,
            StepInput::Fanned(vs) => Value::Array(vs),
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn step_id(&self) -> &str;
    fn metadata(&self) -> &StepMetadata;

    /// A type tag ("text", "list", "any", ...) schema-validated loosely by string
    /// equality; the engine rejects an edge whose producer's `output_type` doesn't
    /// match the consumer's `input_type` (unless the consumer declares `"any"`).
    fn input_type(&self) -> &str;
    fn output_type(&self) -> &str;

    async fn execute(
        &self,
        input: StepInput,
        ctx: &WorkflowContext,
    ) -> Result<Value, Box<dyn Error + Send + Sync>>;
}

type StepFn = Arc<
    dyn Fn(StepInput, WorkflowContext) -> Pin<Box<dyn Future<Output = Result<Value, Box<dyn Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

/// A [`Step`] backed by an async closure, for callers who don't want to write a whole
/// struct + `impl Step` for every pipeline stage.
pub struct FnStep {
    step_id: String,
    metadata: StepMetadata,
    input_type: String,
    output_type: String,
    func: StepFn,
}

impl FnStep {
    pub fn new<F, Fut>(
        step_id: impl Into<String>,
        metadata: StepMetadata,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(StepInput, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Box<dyn Error + Send + Sync>>> + Send + 'static,
    {
        Self {
            step_id: step_id.into(),
            metadata,
            input_type: input_type.into(),
            output_type: output_type.into(),
            func: Arc::new(move |i, c| Box::pin(func(i, c))),
        }
    }
}

#[async_trait]
impl Step for FnStep {
    fn step_id(&self) -> &str {
        &self.step_id
    }

    fn metadata(&self) -> &StepMetadata {
        &self.metadata
    }

    fn input_type(&self) -> &str {
        &self.input_type
    }

    fn output_type(&self) -> &str {
        &self.output_type
    }

    async fn execute(&self, input: StepInput, ctx: &WorkflowContext) -> Result<Value, Box<dyn Error + Send + Sync>> {
        (self.func)(input, ctx.clone()).await
    }
}
