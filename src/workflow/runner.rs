//! DAG validation and execution: a shared-loop idiom (seed, repeat, emit terminal
//! response) generalized from "one agent per turn" to "a batch of steps that just
//! became ready per wave", with `petgraph` used for cycle detection.

use super::checkpoint::{Checkpoint, CheckpointConfig};
use super::context::WorkflowContext;
use super::step::{Step, StepInput};
use crate::error::ConfigurationError;
use chrono::Utc;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// A validated, executable step graph. Built via [`Workflow::new`] + [`Workflow::add_step`]
/// + [`Workflow::add_edge`] (or the [`Workflow::chain`] shorthand for a linear pipeline),
/// then [`Workflow::validate`] before any run.
pub struct Workflow {
    id: String,
    steps: HashMap<String, Arc<dyn Step>>,
    step_order: Vec<String>,
    edges: Vec<(String, String)>,
    initial_state: HashMap<String, serde_json::Value>,
}

impl Workflow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: HashMap::new(),
            step_order: Vec::new(),
            edges: Vec::new(),
            initial_state: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_step(mut self, step: Arc<dyn Step>) -> Self {
        let id = step.step_id().to_string();
        self.step_order.push(id.clone());
        self.steps.insert(id, step);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Convenience for a linear pipeline: `chain(["a", "b", "c"])` adds edges a->b, b->c.
    pub fn chain(mut self, step_ids: &[&str]) -> Self {
        for pair in step_ids.windows(2) {
            self.edges.push((pair[0].to_string(), pair[1].to_string()));
        }
        self
    }

    pub fn with_initial_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.initial_state.insert(key.into(), value);
        self
    }

    fn predecessors(&self) -> HashMap<String, Vec<String>> {
        let mut preds: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in &self.edges {
            preds.entry(to.clone()).or_default().push(from.clone());
        }
        preds
    }

    fn successors(&self) -> HashMap<String, Vec<String>> {
        let mut succs: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in &self.edges {
            succs.entry(from.clone()).or_default().push(to.clone());
        }
        succs
    }

    /// Checks the graph is acyclic, has at least one root and one terminal step, every
    /// edge references a declared step, and every edge's producer/consumer type tags are
    /// compatible (a consumer declaring `"any"` accepts anything).
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (from, to) in &self.edges {
            if !self.steps.contains_key(from) {
                return Err(ConfigurationError::UnknownStep(from.clone()));
            }
            if !self.steps.contains_key(to) {
                return Err(ConfigurationError::UnknownStep(to.clone()));
            }
        }

        let mut graph = DiGraph::<(), ()>::new();
        let mut indices = HashMap::new();
        for id in &self.step_order {
            indices.insert(id.clone(), graph.add_node(()));
        }
        for (from, to) in &self.edges {
            graph.add_edge(indices[from], indices[to], ());
        }
        if is_cyclic_directed(&graph) {
            return Err(ConfigurationError::CyclicWorkflow);
        }

        let preds = self.predecessors();
        let succs = self.successors();
        let has_root = self.step_order.iter().any(|id| !preds.contains_key(id));
        if !has_root {
            return Err(ConfigurationError::NoRootSteps);
        }
        let has_terminal = self.step_order.iter().any(|id| !succs.contains_key(id));
        if !has_terminal {
            return Err(ConfigurationError::NoTerminalSteps);
        }

        for (from, to) in &self.edges {
            let producer = &self.steps[from];
            let consumer = &self.steps[to];
            if consumer.input_type() != "any" && consumer.input_type() != producer.output_type() {
                return Err(ConfigurationError::IncompatibleEdge {
                    from: from.clone(),
                    to: to.clone(),
                    reason: format!(
                        "producer output_type '{}' does not match consumer input_type '{}'",
                        producer.output_type(),
                        consumer.input_type()
                    ),
                });
            }
        }

        Ok(())
    }

    /// A fingerprint of the step ids and edges, independent of insertion order, used to
    /// reject a checkpoint taken against a since-modified workflow.
    pub fn structure_hash(&self) -> String {
        let mut ids: Vec<&String> = self.step_order.iter().collect();
        ids.sort();
        let mut edges: Vec<String> = self.edges.iter().map(|(f, t)| format!("{f}->{t}")).collect();
        edges.sort();

        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        for e in edges {
            hasher.update(e.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// One item of a [`WorkflowRunner`]'s event stream.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StepStarted { step_id: String },
    StepCompleted { step_id: String, output: serde_json::Value },
    StepFailed { step_id: String, error: String },
    CheckpointSaved { checkpoint_id: String },
    WorkflowCompleted { outputs: HashMap<String, serde_json::Value> },
}

pub type WorkflowEventReceiver = mpsc::Receiver<WorkflowEvent>;

/// Final result of a completed (or exhausted) workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowRunResult {
    pub outputs: HashMap<String, serde_json::Value>,
    pub shared_state: HashMap<String, serde_json::Value>,
    pub completed_step_ids: Vec<String>,
    pub failed_step_ids: Vec<String>,
}

/// Executes a validated [`Workflow`] wave by wave: every step whose predecessors have
/// all completed becomes "ready" together, then runs under a `tokio::sync::Semaphore`
/// bounding how many of that wave execute at once, cooperative `tokio` concurrency
/// rather than raw thread spawning. Defaults to running a whole wave at once (the
/// semaphore is sized to the wave itself); `with_max_concurrency` caps it lower.
pub struct WorkflowRunner {
    workflow: Workflow,
    checkpoint: Option<CheckpointConfig>,
    max_concurrency: Option<usize>,
}

impl WorkflowRunner {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            checkpoint: None,
            max_concurrency: None,
        }
    }

    pub fn with_checkpointing(mut self, config: CheckpointConfig) -> Self {
        self.checkpoint = Some(config);
        self
    }

    /// Bounds how many ready steps run concurrently within a single wave. Unset (the
    /// default) runs the whole wave at once, i.e. concurrency equal to the number of
    /// steps that became ready.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency.max(1));
        self
    }

    pub async fn run(&self) -> Result<WorkflowRunResult, ConfigurationError> {
        let mut events = Vec::new();
        self.drive(None, &mut events).await
    }

    pub async fn run_stream(&self) -> WorkflowEventReceiver {
        let (tx, rx) = mpsc::channel(32);
        let mut events = Vec::new();
        let _ = self.drive(None, &mut events).await;
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Resumes the most recent checkpoint for this workflow's id. Refuses with
    /// [`crate::error::ResumeRefused`]-shaped information (surfaced as a `ConfigurationError::Other`
    /// string here; callers matching on the richer `AgentLoomError::ResumeRefused` variant
    /// should call [`Self::resume_checked`] instead) when the checkpoint's structure hash
    /// doesn't match the current workflow.
    pub async fn resume(&self) -> Result<WorkflowRunResult, ConfigurationError> {
        self.resume_checked().await.map_err(|e| match e {
            crate::error::AgentLoomError::Configuration(c) => c,
            other => ConfigurationError::Other(other.to_string()),
        })
    }

    pub async fn resume_checked(&self) -> Result<WorkflowRunResult, crate::error::AgentLoomError> {
        let config = self.checkpoint.as_ref().ok_or_else(|| {
            crate::error::AgentLoomError::Configuration(ConfigurationError::Other(
                "resume requires a CheckpointConfig".to_string(),
            ))
        })?;
        let latest = config
            .store
            .load_latest(self.workflow.id())
            .await
            .map_err(|e| crate::error::AgentLoomError::Other(Box::new(e)))?;
        let Some(checkpoint) = latest else {
            let mut events = Vec::new();
            return self
                .drive(None, &mut events)
                .await
                .map_err(crate::error::AgentLoomError::Configuration);
        };

        let current_hash = self.workflow.structure_hash();
        if checkpoint.structure_hash != current_hash {
            return Err(crate::error::AgentLoomError::ResumeRefused(crate::error::ResumeRefused {
                workflow_id: self.workflow.id().to_string(),
                expected_hash: current_hash,
                found_hash: checkpoint.structure_hash,
            }));
        }

        let mut events = Vec::new();
        self.drive(Some(checkpoint), &mut events)
            .await
            .map_err(crate::error::AgentLoomError::Configuration)
    }

    async fn drive(
        &self,
        resume_from: Option<Checkpoint>,
        events: &mut Vec<WorkflowEvent>,
    ) -> Result<WorkflowRunResult, ConfigurationError> {
        self.workflow.validate()?;

        let preds = self.workflow.predecessors();
        let succs = self.workflow.successors();

        let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: Vec<String> = Vec::new();

        let ctx = if let Some(cp) = &resume_from {
            WorkflowContext::from_snapshot(cp.shared_state.clone())
        } else {
            let ctx = WorkflowContext::new();
            for (k, v) in &self.workflow.initial_state {
                ctx.put(k.clone(), v.clone()).await;
            }
            ctx
        };

        if let Some(cp) = &resume_from {
            for id in &cp.completed_step_ids {
                completed.insert(id.clone());
            }
            outputs = cp.step_outputs.clone();
        }

        let mut remaining: HashSet<String> = self
            .workflow
            .step_order
            .iter()
            .filter(|id| !completed.contains(*id))
            .cloned()
            .collect();

        let mut steps_since_checkpoint = 0usize;

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    preds
                        .get(*id)
                        .map(|p| p.iter().all(|dep| completed.contains(dep)))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                return Err(ConfigurationError::Other(
                    "workflow stalled: remaining steps have unsatisfied predecessors".to_string(),
                ));
            }

            for id in &ready {
                events.push(WorkflowEvent::StepStarted { step_id: id.clone() });
            }

            let semaphore = Arc::new(Semaphore::new(self.max_concurrency.unwrap_or(ready.len().max(1))));
            let outcomes = futures_util::future::join_all(ready.iter().map(|id| {
                let step = self.workflow.steps[id].clone();
                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let input = match preds.get(id) {
                    None => StepInput::None,
                    Some(deps) if deps.len() == 1 => {
                        StepInput::Single(outputs.get(&deps[0]).cloned().unwrap_or(serde_json::Value::Null))
                    }
                    Some(deps) => StepInput::Fanned(
                        deps.iter().map(|d| outputs.get(d).cloned().unwrap_or(serde_json::Value::Null)).collect(),
                    ),
                };
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                    let result = step.execute(input, &ctx).await;
                    (step.step_id().to_string(), result)
                }
            }))
            .await;

            for (id, result) in outcomes {
                remaining.remove(&id);
                match result {
                    Ok(value) => {
                        events.push(WorkflowEvent::StepCompleted {
                            step_id: id.clone(),
                            output: value.clone(),
                        });
                        outputs.insert(id.clone(), value);
                        completed.insert(id.clone());
                    }
                    Err(e) => {
                        events.push(WorkflowEvent::StepFailed {
                            step_id: id.clone(),
                            error: e.to_string(),
                        });
                        failed.push(id.clone());
                        completed.insert(id.clone());
                        for succ in succs.get(&id).into_iter().flatten() {
                            remaining.remove(succ);
                            failed.push(succ.clone());
                            completed.insert(succ.clone());
                        }
                    }
                }
            }

            steps_since_checkpoint += 1;
            if let Some(config) = &self.checkpoint {
                if config.auto_save && steps_since_checkpoint >= config.save_interval_steps {
                    steps_since_checkpoint = 0;
                    let checkpoint = Checkpoint {
                        checkpoint_id: Uuid::new_v4().to_string(),
                        workflow_id: self.workflow.id().to_string(),
                        structure_hash: self.workflow.structure_hash(),
                        timestamp: Utc::now(),
                        completed_step_ids: completed.iter().cloned().collect(),
                        pending_step_ids: remaining.iter().cloned().collect(),
                        step_outputs: outputs.clone(),
                        shared_state: ctx.snapshot().await,
                        metadata: HashMap::new(),
                    };
                    if config.store.save(&checkpoint).await.is_ok() {
                        events.push(WorkflowEvent::CheckpointSaved {
                            checkpoint_id: checkpoint.checkpoint_id,
                        });
                    }
                    if config.auto_cleanup {
                        if let Ok(mut metas) = config.store.list_metadata(Some(self.workflow.id())).await {
                            metas.sort_by_key(|m| m.timestamp);
                            while metas.len() > config.keep_last_n {
                                let oldest = metas.remove(0);
                                let _ = config.store.delete(&oldest.checkpoint_id).await;
                            }
                        }
                    }
                }
            }
        }

        events.push(WorkflowEvent::WorkflowCompleted {
            outputs: outputs.clone(),
        });

        Ok(WorkflowRunResult {
            outputs,
            shared_state: ctx.snapshot().await,
            completed_step_ids: completed.into_iter().filter(|id| !failed.contains(id)).collect(),
            failed_step_ids: failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::checkpoint::InMemoryCheckpointStore;
    use crate::workflow::step::{FnStep, StepMetadata};

    fn double_step(id: &str) -> Arc<dyn Step> {
        Arc::new(FnStep::new(id, StepMetadata::new(id, ""), "number", "number", |input, _ctx| async move {
            let n = input.into_value().as_i64().unwrap_or(0);
            Ok(serde_json::json!(n * 2))
        }))
    }

    fn seed_step(id: &str, value: i64) -> Arc<dyn Step> {
        Arc::new(FnStep::new(id, StepMetadata::new(id, ""), "any", "number", move |_input, _ctx| async move {
            Ok(serde_json::json!(value))
        }))
    }

    fn sum_step(id: &str) -> Arc<dyn Step> {
        Arc::new(FnStep::new(id, StepMetadata::new(id, ""), "number", "number", |input, _ctx| async move {
            let sum: i64 = match input {
                StepInput::Fanned(vs) => vs.iter().filter_map(|v| v.as_i64()).sum(),
                other => other.into_value().as_i64().unwrap_or(0),
            };
            Ok(serde_json::json!(sum))
        }))
    }

    #[test]
    fn validate_rejects_cycle() {
        let workflow = Workflow::new("wf")
            .add_step(seed_step("a", 1))
            .add_step(double_step("b"))
            .add_edge("a", "b")
            .add_edge("b", "a");
        assert!(matches!(workflow.validate(), Err(ConfigurationError::CyclicWorkflow)));
    }

    #[test]
    fn validate_rejects_type_mismatch() {
        let mismatched: Arc<dyn Step> = Arc::new(FnStep::new(
            "c",
            StepMetadata::new("c", ""),
            "text",
            "text",
            |_input, _ctx| async move { Ok(serde_json::json!("x")) },
        ));
        let workflow = Workflow::new("wf")
            .add_step(seed_step("a", 1))
            .add_step(mismatched)
            .add_edge("a", "c");
        assert!(matches!(workflow.validate(), Err(ConfigurationError::IncompatibleEdge { .. })));
    }

    #[tokio::test]
    async fn linear_chain_runs_in_order() {
        let workflow = Workflow::new("wf")
            .add_step(seed_step("seed", 21))
            .add_step(double_step("double"))
            .chain(&["seed", "double"]);
        let runner = WorkflowRunner::new(workflow);
        let result = runner.run().await.unwrap();
        assert_eq!(result.outputs["double"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn max_concurrency_bounds_how_many_ready_steps_run_at_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tracked_step = |id: &str| -> Arc<dyn Step> {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            Arc::new(FnStep::new(id, StepMetadata::new(id, ""), "any", "number", move |_input, _ctx| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(serde_json::json!(1))
                }
            }))
        };

        let workflow = Workflow::new("wf")
            .add_step(tracked_step("a"))
            .add_step(tracked_step("b"))
            .add_step(tracked_step("c"))
            .add_step(tracked_step("d"));
        let runner = WorkflowRunner::new(workflow).with_max_concurrency(2);
        runner.run().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2, "at most 2 of the 4 ready steps should run at once");
    }

    #[tokio::test]
    async fn fan_in_step_sees_all_predecessor_outputs() {
        let workflow = Workflow::new("wf")
            .add_step(seed_step("a", 10))
            .add_step(seed_step("b", 32))
            .add_step(sum_step("total"))
            .add_edge("a", "total")
            .add_edge("b", "total");
        let runner = WorkflowRunner::new(workflow);
        let result = runner.run().await.unwrap();
        assert_eq!(result.outputs["total"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn checkpoint_then_resume_skips_completed_steps() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let build = || {
            Workflow::new("resumable")
                .add_step(seed_step("seed", 21))
                .add_step(double_step("double"))
                .chain(&["seed", "double"])
        };

        let runner = WorkflowRunner::new(build()).with_checkpointing(CheckpointConfig::new(store.clone()));
        runner.run().await.unwrap();

        let resumed_runner = WorkflowRunner::new(build()).with_checkpointing(CheckpointConfig::new(store.clone()));
        let result = resumed_runner.resume().await.unwrap();
        assert_eq!(result.outputs["double"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn resume_refuses_when_structure_changed() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let runner = WorkflowRunner::new(
            Workflow::new("wf")
                .add_step(seed_step("seed", 1))
                .add_step(double_step("double"))
                .chain(&["seed", "double"]),
        )
        .with_checkpointing(CheckpointConfig::new(store.clone()));
        runner.run().await.unwrap();

        let changed = WorkflowRunner::new(
            Workflow::new("wf")
                .add_step(seed_step("seed", 1))
                .add_step(double_step("double"))
                .add_step(double_step("triple"))
                .chain(&["seed", "double", "triple"]),
        )
        .with_checkpointing(CheckpointConfig::new(store.clone()));

        let err = changed.resume_checked().await.unwrap_err();
        assert!(matches!(err, crate::error::AgentLoomError::ResumeRefused(_)));
    }
}
