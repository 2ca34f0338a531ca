//! DAG-structured multi-step pipelines with shared context and resumable checkpoints.
//!
//! A validated step graph (`runner::Workflow`) executed wave by wave by
//! `runner::WorkflowRunner`, with progress durably snapshotted via
//! `checkpoint::CheckpointStore`.

pub mod checkpoint;
pub mod context;
pub mod runner;
pub mod step;

pub use checkpoint::{Checkpoint, CheckpointConfig, CheckpointMeta, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use context::WorkflowContext;
pub use runner::{Workflow, WorkflowEvent, WorkflowEventReceiver, WorkflowRunResult, WorkflowRunner};
pub use step::{FnStep, Step, StepInput, StepMetadata};
