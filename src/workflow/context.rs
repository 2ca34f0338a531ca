//! Shared key/value state visible to every step of one workflow run.
//!
//! A single `RwLock` over the whole map rather than per-key locks: one writer at a time
//! per key is satisfied a fortiori by serializing writes globally, at far less
//! complexity than a lock-striped map. See `DESIGN.md` for the tradeoff.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct WorkflowContext {
    shared: Arc<RwLock<HashMap<String, Value>>>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(state: HashMap<String, Value>) -> Self {
        Self {
            shared: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.shared.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: impl Into<String>, value: Value) {
        self.shared.write().await.insert(key.into(), value);
    }

    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.shared.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let ctx = WorkflowContext::new();
        ctx.put("k", serde_json::json!(42)).await;
        assert_eq!(ctx.get("k").await, Some(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn snapshot_and_from_snapshot_round_trip() {
        let ctx = WorkflowContext::new();
        ctx.put("a", serde_json::json!("x")).await;
        let snapshot = ctx.snapshot().await;
        let restored = WorkflowContext::from_snapshot(snapshot);
        assert_eq!(restored.get("a").await, Some(serde_json::json!("x")));
    }
}
