//! Structural dump/load for framework components, generalizing the `#[derive(Serialize,
//! Deserialize)]` idiom already pervasive on wire-facing structs (`ToolMetadata`,
//! `ToolResult`) into one explicit `ComponentModel` shape every component can be
//! reconstructed from.
//!
//! Components holding opaque callables (`FnStep`, a `CheckpointStore` trait object)
//! refuse via [`SerializationError::NotSerializable`] rather than silently dropping the
//! callable.

use crate::error::SerializationError;
use crate::termination::{MaxMessages, MaxTurns, TextMention};
use crate::tool::ToolMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-tagged, versioned snapshot of one component's configuration. `config` must
/// be plain JSON (strings, numbers, booleans, null, arrays, records) — no opaque Rust
/// values — so `ComponentModel` itself always round-trips through `serde_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub provider: String,
    pub config: Value,
    pub version: String,
}

impl ComponentModel {
    pub fn new(provider: impl Into<String>, config: Value) -> Self {
        Self {
            provider: provider.into(),
            config,
            version: "1".to_string(),
        }
    }
}

/// Implemented by components that can describe themselves as a [`ComponentModel`].
pub trait Dumpable {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError>;
}

/// Implemented by components that can be reconstructed from a [`ComponentModel`].
pub trait Loadable: Sized {
    fn load_component(model: &ComponentModel) -> Result<Self, SerializationError>;
}

fn expect_provider(model: &ComponentModel, expected: &str) -> Result<(), SerializationError> {
    if model.provider != expected {
        return Err(SerializationError::Invalid(format!(
            "expected provider '{expected}', found '{}'",
            model.provider
        )));
    }
    Ok(())
}

impl Dumpable for MaxMessages {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError> {
        Ok(ComponentModel::new("max_messages", serde_json::json!({ "max": self.max })))
    }
}

impl Loadable for MaxMessages {
    fn load_component(model: &ComponentModel) -> Result<Self, SerializationError> {
        expect_provider(model, "max_messages")?;
        let max = model
            .config
            .get("max")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SerializationError::Invalid("missing 'max'".to_string()))?;
        Ok(MaxMessages::new(max as usize))
    }
}

impl Dumpable for TextMention {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError> {
        Ok(ComponentModel::new(
            "text_mention",
            serde_json::json!({ "needle": self.needle, "case_sensitive": self.case_sensitive }),
        ))
    }
}

impl Loadable for TextMention {
    fn load_component(model: &ComponentModel) -> Result<Self, SerializationError> {
        expect_provider(model, "text_mention")?;
        let needle = model
            .config
            .get("needle")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SerializationError::Invalid("missing 'needle'".to_string()))?;
        let case_sensitive = model
            .config
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        Ok(TextMention::new(needle, case_sensitive))
    }
}

impl Dumpable for MaxTurns {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError> {
        Ok(ComponentModel::new("max_turns", serde_json::json!({ "max": self.max })))
    }
}

impl Loadable for MaxTurns {
    fn load_component(model: &ComponentModel) -> Result<Self, SerializationError> {
        expect_provider(model, "max_turns")?;
        let max = model
            .config
            .get("max")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SerializationError::Invalid("missing 'max'".to_string()))?;
        Ok(MaxTurns::new(max as usize))
    }
}

impl Dumpable for ToolMetadata {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError> {
        let config = serde_json::to_value(self).map_err(|e| SerializationError::Invalid(e.to_string()))?;
        Ok(ComponentModel::new("tool_metadata", config))
    }
}

impl Loadable for ToolMetadata {
    fn load_component(model: &ComponentModel) -> Result<Self, SerializationError> {
        expect_provider(model, "tool_metadata")?;
        serde_json::from_value(model.config.clone()).map_err(|e| SerializationError::Invalid(e.to_string()))
    }
}

/// Marker for components that are inherently opaque (closures, trait objects with no
/// data representation) — always refuses. Exists so call sites have a single type to
/// name in tests asserting the refusal rule, rather than constructing a `FnStep` just
/// to prove it can't be dumped.
pub struct OpaqueCallable {
    pub kind: &'static str,
}

impl Dumpable for OpaqueCallable {
    fn dump_component(&self) -> Result<ComponentModel, SerializationError> {
        Err(SerializationError::NotSerializable(self.kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_messages_round_trips() {
        let original = MaxMessages::new(8);
        let model = original.dump_component().unwrap();
        let restored = MaxMessages::load_component(&model).unwrap();
        assert_eq!(restored.dump_component().unwrap(), model);
    }

    #[test]
    fn text_mention_round_trips() {
        let original = TextMention::new("APPROVED", true);
        let model = original.dump_component().unwrap();
        let restored = TextMention::load_component(&model).unwrap();
        assert_eq!(restored.needle, "APPROVED");
        assert_eq!(restored.case_sensitive, true);
        assert_eq!(restored.dump_component().unwrap(), model);
    }

    #[test]
    fn text_mention_load_defaults_case_sensitive_when_absent() {
        let model = ComponentModel::new("text_mention", serde_json::json!({ "needle": "APPROVED" }));
        let restored = TextMention::load_component(&model).unwrap();
        assert_eq!(restored.case_sensitive, true);
    }

    #[test]
    fn tool_metadata_round_trips() {
        let original = ToolMetadata::new("calculator", "does arithmetic");
        let model = original.dump_component().unwrap();
        let restored = ToolMetadata::load_component(&model).unwrap();
        assert_eq!(restored.dump_component().unwrap(), model);
    }

    #[test]
    fn load_rejects_wrong_provider() {
        let model = ComponentModel::new("text_mention", serde_json::json!({ "needle": "x" }));
        let err = MaxMessages::load_component(&model).unwrap_err();
        assert!(matches!(err, SerializationError::Invalid(_)));
    }

    #[test]
    fn opaque_callable_refuses_serialization() {
        let step = OpaqueCallable { kind: "FnStep" };
        let err = step.dump_component().unwrap_err();
        assert!(matches!(err, SerializationError::NotSerializable(_)));
    }
}
