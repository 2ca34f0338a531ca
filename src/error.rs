//! Error types shared across the agent loop, orchestrators, and workflow engine.
//!
//! Each concern gets its own enum with a hand-written [`fmt::Display`] and a blanket
//! [`std::error::Error`] impl, following the style used throughout the tool and
//! middleware layers. [`AgentLoomError`] aggregates the module-level errors at the
//! outer boundary (agent loop, orchestrator, workflow runner) where callers generally
//! want a single type to match on.

use std::fmt;

/// Malformed construction: empty agent name, bad schema, cyclic workflow, duplicate
/// tool registration, and other errors detected before any async work starts.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    EmptyAgentName,
    DuplicateTool(String),
    DuplicateAgentName(String),
    CyclicWorkflow,
    NoRootSteps,
    NoTerminalSteps,
    IncompatibleEdge {
        from: String,
        to: String,
        reason: String,
    },
    UnknownStep(String),
    Other(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAgentName => write!(f, "agent name must not be empty"),
            Self::DuplicateTool(name) => write!(f, "tool '{name}' is already registered"),
            Self::DuplicateAgentName(name) => write!(f, "agent '{name}' is already registered"),
            Self::CyclicWorkflow => write!(f, "workflow graph contains a cycle"),
            Self::NoRootSteps => write!(f, "workflow has no root steps (every step has an inbound edge)"),
            Self::NoTerminalSteps => write!(f, "workflow has no terminal steps"),
            Self::IncompatibleEdge { from, to, reason } => {
                write!(f, "edge {from} -> {to} is incompatible: {reason}")
            }
            Self::UnknownStep(id) => write!(f, "unknown step id '{id}'"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Tool arguments that fail schema validation, or structured output that fails to parse.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub details: String,
}

impl ValidationError {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error: {}", self.details)
    }
}

impl std::error::Error for ValidationError {}

/// Transport failure surfaced by a [`crate::client::ChatCompletionClient`] implementation.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider error: {}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// A cooperative timeout fired before the inner operation completed.
#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub operation: String,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation '{}' timed out", self.operation)
    }
}

impl std::error::Error for TimeoutError {}

/// A cooperative cancellation outcome: the operation was abandoned at the nearest
/// suspension point after a [`crate::cancellation::CancellationToken`] was tripped.
#[derive(Debug, Clone)]
pub struct CancelledError {
    pub operation: String,
}

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation '{}' was cancelled", self.operation)
    }
}

impl std::error::Error for CancelledError {}

/// Middleware-enforced denial, distinguishable from a provider's own rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub limit_per_minute: u32,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate limit exceeded ({} calls/minute)",
            self.limit_per_minute
        )
    }
}

impl std::error::Error for RateLimitError {}

/// Raised by a [`crate::middleware::Middleware`] to abort a request outright (distinct
/// from a short-circuit, which still produces a result).
#[derive(Debug, Clone)]
pub struct MiddlewareError {
    pub middleware: String,
    pub reason: String,
}

impl fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "middleware '{}' blocked request: {}", self.middleware, self.reason)
    }
}

impl std::error::Error for MiddlewareError {}

/// A workflow checkpoint's structure hash does not match the current workflow's
/// structure; resume is refused rather than silently replaying a stale graph.
#[derive(Debug, Clone)]
pub struct ResumeRefused {
    pub workflow_id: String,
    pub expected_hash: String,
    pub found_hash: String,
}

impl fmt::Display for ResumeRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refusing to resume workflow '{}': structure hash mismatch (expected {}, found {})",
            self.workflow_id, self.expected_hash, self.found_hash
        )
    }
}

impl std::error::Error for ResumeRefused {}

/// A component that cannot produce (or consume) a [`crate::serialization::ComponentModel`]
/// — an opaque callable (a closure-backed step, a raw trait object) rather than a
/// refusal to implement the feature.
#[derive(Debug, Clone)]
pub enum SerializationError {
    NotSerializable(String),
    Invalid(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSerializable(what) => write!(f, "{what} holds an opaque callable and cannot be serialized"),
            Self::Invalid(msg) => write!(f, "invalid component model: {msg}"),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Aggregate error type used at the outer boundary of the agent loop, orchestrators,
/// and the workflow runner, where callers generally want one type to match on.
#[derive(Debug)]
pub enum AgentLoomError {
    Configuration(ConfigurationError),
    Validation(ValidationError),
    Provider(ProviderError),
    Timeout(TimeoutError),
    Cancelled(CancelledError),
    RateLimit(RateLimitError),
    Middleware(MiddlewareError),
    ResumeRefused(ResumeRefused),
    Serialization(SerializationError),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for AgentLoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::Provider(e) => write!(f, "{e}"),
            Self::Timeout(e) => write!(f, "{e}"),
            Self::Cancelled(e) => write!(f, "{e}"),
            Self::RateLimit(e) => write!(f, "{e}"),
            Self::Middleware(e) => write!(f, "{e}"),
            Self::ResumeRefused(e) => write!(f, "{e}"),
            Self::Serialization(e) => write!(f, "{e}"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AgentLoomError {}

macro_rules! from_variant {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for AgentLoomError {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        }
    };
}

from_variant!(Configuration, ConfigurationError);
from_variant!(Validation, ValidationError);
from_variant!(Provider, ProviderError);
from_variant!(Timeout, TimeoutError);
from_variant!(Cancelled, CancelledError);
from_variant!(RateLimit, RateLimitError);
from_variant!(Middleware, MiddlewareError);
from_variant!(ResumeRefused, ResumeRefused);
from_variant!(Serialization, SerializationError);

impl From<Box<dyn std::error::Error + Send + Sync>> for AgentLoomError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(e)
    }
}
