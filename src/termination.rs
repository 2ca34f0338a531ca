//! Logical conditions deciding when an agent loop or orchestration should stop.
//!
//! [`TerminationCondition`] implementors are composed with `|` (stop as soon as either
//! side would stop) and `&` (stop only once both sides would stop) via operator
//! overloading on `Arc<dyn TerminationCondition>`, rather than a hardcoded enum of cases.

use crate::context::AgentContext;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

/// Evaluated once per turn against the current [`AgentContext`] to decide whether
/// execution should stop. `true` means "stop now".
pub trait TerminationCondition: Send + Sync {
    fn should_terminate(&self, context: &AgentContext) -> bool;

    /// Human-readable reason, surfaced in `FinishReason::Terminated` / orchestration
    /// results so callers can tell which condition fired.
    fn reason(&self) -> String {
        "termination condition met".to_string()
    }
}

/// Stops once the context's message count reaches `max`.
pub struct MaxMessages {
    pub max: usize,
}

impl MaxMessages {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl TerminationCondition for MaxMessages {
    fn should_terminate(&self, context: &AgentContext) -> bool {
        context.messages().len() >= self.max
    }

    fn reason(&self) -> String {
        format!("reached max messages ({})", self.max)
    }
}

/// Stops once any assistant message's text content contains `needle`.
pub struct TextMention {
    pub needle: String,
    pub case_sensitive: bool,
}

impl TextMention {
    pub fn new(needle: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            needle: needle.into(),
            case_sensitive,
        }
    }
}

impl TerminationCondition for TextMention {
    fn should_terminate(&self, context: &AgentContext) -> bool {
        context
            .messages()
            .iter()
            .filter(|m| m.is_assistant())
            .any(|m| {
                if self.case_sensitive {
                    m.content().contains(&self.needle)
                } else {
                    m.content().to_lowercase().contains(&self.needle.to_lowercase())
                }
            })
    }

    fn reason(&self) -> String {
        format!("message mentioned '{}'", self.needle)
    }
}

/// Stops once the number of assistant turns (messages with an assistant source)
/// reaches `max`, distinct from [`MaxMessages`] which counts every message including
/// tool results and system/user turns.
pub struct MaxTurns {
    pub max: usize,
}

impl MaxTurns {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl TerminationCondition for MaxTurns {
    fn should_terminate(&self, context: &AgentContext) -> bool {
        context.messages().iter().filter(|m| m.is_assistant()).count() >= self.max
    }

    fn reason(&self) -> String {
        format!("reached max turns ({})", self.max)
    }
}

/// Never terminates on its own; useful as a neutral element when composing with `&`.
pub struct Never;

impl TerminationCondition for Never {
    fn should_terminate(&self, _context: &AgentContext) -> bool {
        false
    }

    fn reason(&self) -> String {
        "never".to_string()
    }
}

enum CompositeOp {
    Or,
    And,
}

/// Result of combining two conditions with `|` or `&`. Short-circuits the left side
/// first, matching normal boolean evaluation order.
pub struct Composite {
    left: Arc<dyn TerminationCondition>,
    right: Arc<dyn TerminationCondition>,
    op: CompositeOp,
    last_reason: std::sync::Mutex<String>,
}

impl TerminationCondition for Composite {
    fn should_terminate(&self, context: &AgentContext) -> bool {
        let left = self.left.should_terminate(context);
        let (stop, reason) = match self.op {
            CompositeOp::Or => {
                if left {
                    (true, self.left.reason())
                } else {
                    let right = self.right.should_terminate(context);
                    (right, self.right.reason())
                }
            }
            CompositeOp::And => {
                if !left {
                    (false, String::new())
                } else {
                    let right = self.right.should_terminate(context);
                    (
                        right,
                        format!("{} and {}", self.left.reason(), self.right.reason()),
                    )
                }
            }
        };
        if stop {
            *self.last_reason.lock().unwrap() = reason;
        }
        stop
    }

    fn reason(&self) -> String {
        self.last_reason.lock().unwrap().clone()
    }
}

/// Wraps any `TerminationCondition` in an `Arc` so it can participate in `|`/`&`
/// composition without callers having to wrap it manually every time.
pub fn arc(condition: impl TerminationCondition + 'static) -> Arc<dyn TerminationCondition> {
    Arc::new(condition)
}

impl BitOr for Arc<dyn TerminationCondition> {
    type Output = Arc<dyn TerminationCondition>;

    fn bitor(self, rhs: Self) -> Self::Output {
        Arc::new(Composite {
            left: self,
            right: rhs,
            op: CompositeOp::Or,
            last_reason: std::sync::Mutex::new(String::new()),
        })
    }
}

impl BitAnd for Arc<dyn TerminationCondition> {
    type Output = Arc<dyn TerminationCondition>;

    fn bitand(self, rhs: Self) -> Self::Output {
        Arc::new(Composite {
            left: self,
            right: rhs,
            op: CompositeOp::And,
            last_reason: std::sync::Mutex::new(String::new()),
        })
    }
}
