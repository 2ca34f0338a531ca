//! Agent loops, middleware, multi-agent orchestration, and a DAG workflow engine for
//! building LLM-driven systems.

pub mod agent;
pub mod cancellation;
pub mod client;
pub mod context;
pub mod error;
pub mod eval;
pub mod message;
pub mod middleware;
pub mod orchestrator;
pub mod serialization;
pub mod termination;
pub mod tool;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentResponse, Event, FinishReason};
pub use client::{ChatCompletionClient, ChatCompletionResult, Chunk, MockClient, OutputFormat, Usage};
pub use context::AgentContext;
pub use error::AgentLoomError;
pub use message::Message;
pub use middleware::{Middleware, MiddlewareChain};
pub use orchestrator::{Orchestrator, OrchestrationResponse, SelectionPolicy};
pub use termination::TerminationCondition;
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use workflow::{Workflow, WorkflowContext, WorkflowRunner};
