//! Built-in demonstration tool(s).
//!
//! Production tool implementations — filesystem, web
//! search, code execution, memory stores — are external collaborators and are not
//! shipped here. [`calculator::CalculatorTool`] is kept only as the example/test tool
//! used by the agent-loop seed tests and the tool registry's own unit tests.
//! [`agent_as_tool::AgentAsToolWrapper`] is a generic tool, not a demonstration: it
//! lets any nested [`crate::agent::Agent`] be registered as a callable tool.

pub mod agent_as_tool;
pub mod calculator;

pub use agent_as_tool::AgentAsToolWrapper;
pub use calculator::{CalculatorError, CalculatorTool};
