//! Tool registry, parameter schemas, and the approval-aware execution pipeline.
//!
//! A `Tool` is a directly-invokable trait object with a declared parameter schema and
//! an [`ApprovalMode`], and [`ToolRegistry`] is a flat name → tool map. Protocol-level
//! routing (MCP, remote tool servers) is an external-collaborator concern and is not
//! reproduced here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub result: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A tool-level policy requiring caller consent before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalMode {
    /// Execute immediately without pausing the agent loop.
    Never,
    /// Always gate execution on an explicit caller approval.
    Always,
}

/// JSON-Schema-shaped parameter type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

/// One declared parameter of a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Static description of a tool: identity, parameter schema, and approval policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub approval_mode: ApprovalMode,
    /// Per-call timeout. `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            approval_mode: ApprovalMode::Never,
            timeout_ms: None,
        }
    }

    pub fn with_parameter(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_approval_mode(mut self, mode: ApprovalMode) -> Self {
        self.approval_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Render this tool's schema as a provider-facing [`crate::client::ToolDefinition`].
    pub fn to_tool_definition(&self) -> crate::client::ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let type_str = match p.param_type {
                ParameterType::String => "string",
                ParameterType::Number => "number",
                ParameterType::Integer => "integer",
                ParameterType::Boolean => "boolean",
                ParameterType::Array => "array",
                ParameterType::Object => "object",
            };
            let mut prop = serde_json::json!({ "type": type_str });
            if let Some(desc) = &p.description {
                prop["description"] = Value::String(desc.clone());
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        crate::client::ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": Value::Object(properties),
                "required": required,
            }),
        }
    }

    /// Validate `args` against the declared schema: every required parameter must be
    /// present, and every present parameter's JSON type must match its declared type.
    pub fn validate(&self, args: &HashMap<String, Value>) -> Result<(), ToolError> {
        for param in &self.parameters {
            match args.get(&param.name) {
                None if param.required && param.default.is_none() => {
                    return Err(ToolError::InvalidParameters(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                Some(value) if !type_matches(&param.param_type, value) => {
                    return Err(ToolError::InvalidParameters(format!(
                        "parameter '{}' has the wrong type",
                        param.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn type_matches(expected: &ParameterType, value: &Value) -> bool {
    match expected {
        ParameterType::String => value.is_string(),
        ParameterType::Number => value.is_number(),
        ParameterType::Integer => value.is_i64() || value.is_u64(),
        ParameterType::Boolean => value.is_boolean(),
        ParameterType::Array => value.is_array(),
        ParameterType::Object => value.is_object(),
    }
}

/// Errors raised while validating, dispatching, or executing a tool call.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    InvalidParameters(String),
    ExecutionFailed(String),
    Timeout(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "unknown tool '{name}'"),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {msg}"),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {msg}"),
            ToolError::Timeout(name) => write!(f, "tool '{name}' timed out"),
        }
    }
}

impl Error for ToolError {}

/// A callable tool. Implementors supply [`invoke`](Tool::invoke); schema validation
/// and approval gating are handled by the registry/executor, not by the tool itself.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;

    async fn invoke(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;
}

/// Flat name → tool registry. Construction-time name collisions are a
/// [`crate::error::ConfigurationError`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Returns an error if a tool with the same name already exists.
    pub fn register(
        &mut self,
        tool: Arc<dyn Tool>,
    ) -> Result<(), crate::error::ConfigurationError> {
        let name = tool.metadata().name.clone();
        if self.tools.contains_key(&name) {
            return Err(crate::error::ConfigurationError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_definitions(&self) -> Vec<crate::client::ToolDefinition> {
        self.tools
            .values()
            .map(|t| t.metadata().to_tool_definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Outcome of dispatching a single tool call through [`ToolExecutor::execute`].
pub enum ExecutionOutcome {
    /// The tool ran (successfully or not); `ToolResult::success` distinguishes the two.
    Completed(ToolResult),
    /// The tool requires approval and none has been granted yet.
    NeedsApproval,
    /// No tool with this name is registered.
    UnknownTool,
}

/// Validates arguments, enforces approval gating, and invokes the underlying tool,
/// respecting a per-call timeout.
pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    /// Dispatch one call. `approved` is the caller's decision when the tool requires
    /// approval and one has already been made (`Some(true)`/`Some(false)`); `None`
    /// means "no decision yet".
    pub async fn execute(
        &self,
        tool_name: &str,
        args: HashMap<String, Value>,
        approved: Option<bool>,
    ) -> ExecutionOutcome {
        let Some(tool) = self.registry.get(tool_name) else {
            return ExecutionOutcome::UnknownTool;
        };
        let metadata = tool.metadata();

        if let Err(e) = metadata.validate(&args) {
            return ExecutionOutcome::Completed(ToolResult::failure(e.to_string()));
        }

        if metadata.approval_mode == ApprovalMode::Always {
            match approved {
                None => return ExecutionOutcome::NeedsApproval,
                Some(false) => {
                    return ExecutionOutcome::Completed(ToolResult::failure(
                        "rejected by user",
                    ))
                }
                Some(true) => {}
            }
        }

        let timeout = metadata.timeout_ms.map(Duration::from_millis);
        let invocation = tool.invoke(args);

        let outcome = match timeout {
            Some(d) => match tokio::time::timeout(d, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    return ExecutionOutcome::Completed(ToolResult::failure(format!(
                        "tool '{tool_name}' timed out"
                    )))
                }
            },
            None => invocation.await,
        };

        match outcome {
            Ok(result) => ExecutionOutcome::Completed(result),
            Err(e) => ExecutionOutcome::Completed(ToolResult::failure(e.to_string())),
        }
    }
}
