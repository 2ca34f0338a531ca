//! A minimal scientific calculator tool, used by this crate's own agent-loop tests
//! and by [`crate::tool`]'s registry tests.
//!
//! A stateless `Calculator` backed by `evalexpr`, exposing a single `{a, b, op}`
//! signature rather than a full expression language (trig, hyperbolic, array stats) —
//! this crate only needs a demonstration tool, not a general-purpose one.

use crate::tool::{ApprovalMode, Parameter, ParameterType, Tool, ToolMetadata, ToolResult};
use async_trait::async_trait;
use evalexpr::{eval, Value as EvalValue};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Errors raised while evaluating a calculator expression.
#[derive(Debug, Clone)]
pub struct CalculatorError {
    pub message: String,
}

impl CalculatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "calculator error: {}", self.message)
    }
}

impl std::error::Error for CalculatorError {}

/// Stateless scientific calculator, safe for concurrent use from many agents.
pub struct CalculatorTool {
    metadata: ToolMetadata,
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new(
                "calculator",
                "Evaluates a binary arithmetic operation over two numbers: add, subtract, \
                 multiply, divide, power, or modulo.",
            )
            .with_parameter(Parameter::new("a", ParameterType::Number).required())
            .with_parameter(Parameter::new("b", ParameterType::Number).required())
            .with_parameter(
                Parameter::new("op", ParameterType::String)
                    .with_description("one of: add, subtract, multiply, divide, power, modulo")
                    .required(),
            )
            .with_approval_mode(ApprovalMode::Never),
        }
    }

    /// Evaluate `a <op> b`, delegating the arithmetic itself to `evalexpr` for every
    /// operator except `power`.
    pub fn evaluate(a: f64, b: f64, op: &str) -> Result<f64, CalculatorError> {
        if op == "power" {
            return Ok(a.powf(b));
        }

        let expr = match op {
            "add" => format!("{a} + {b}"),
            "subtract" => format!("{a} - {b}"),
            "multiply" => format!("{a} * {b}"),
            "divide" => {
                if b == 0.0 {
                    return Err(CalculatorError::new("division by zero"));
                }
                format!("{a} / {b}")
            }
            "modulo" => {
                if b == 0.0 {
                    return Err(CalculatorError::new("modulo by zero"));
                }
                format!("{a} % {b}")
            }
            other => return Err(CalculatorError::new(format!("unknown operator '{other}'"))),
        };

        match eval(&expr) {
            Ok(EvalValue::Float(f)) => Ok(f),
            Ok(EvalValue::Int(i)) => Ok(i as f64),
            Ok(_) => Err(CalculatorError::new("expression did not evaluate to a number")),
            Err(e) => Err(CalculatorError::new(e.to_string())),
        }
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn invoke(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let a = args.get("a").and_then(Value::as_f64).unwrap_or(0.0);
        let b = args.get("b").and_then(Value::as_f64).unwrap_or(0.0);
        let op = args
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or("add")
            .to_string();

        match Self::evaluate(a, b, &op) {
            Ok(result) => Ok(ToolResult::success(result.to_string())),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_matches_seed_scenario() {
        // "What is 545.34567 * 34555.34?" — result must contain the prefix "18844".
        let result = CalculatorTool::evaluate(545.34567, 34555.34, "multiply").unwrap();
        assert!(result.to_string().starts_with("18844"));
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        assert!(CalculatorTool::evaluate(1.0, 0.0, "divide").is_err());
    }

    #[tokio::test]
    async fn invoke_reports_failure_for_unknown_operator() {
        let tool = CalculatorTool::new();
        let mut args = HashMap::new();
        args.insert("a".to_string(), Value::from(1));
        args.insert("b".to_string(), Value::from(2));
        args.insert("op".to_string(), Value::from("frobnicate"));
        let result = tool.invoke(args).await.unwrap();
        assert!(!result.success);
    }
}
