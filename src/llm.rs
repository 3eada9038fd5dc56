//! Language-model boundary.
//!
//! The LLM is an opaque external collaborator: context in, structured action
//! (or raw text) out. The core never issues HTTP requests or owns prompts —
//! hosts inject a [`LanguageModel`] implementation, which also makes the
//! decision loop fully testable with scripted doubles.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One structured action proposal from the model.
///
/// `params` is raw JSON; [`crate::agent::Action::parse`] is the single
/// validation step that turns it into a typed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Action name, e.g. "reply", "search", "remind".
    pub name: String,
    /// Action parameters as a JSON object.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A black-box language model.
pub trait LanguageModel: Send + Sync {
    /// Propose the next action given the rendered working-memory context.
    ///
    /// Returns [`LlmError::NoAction`] when the model's output cannot be
    /// shaped into a proposal — the decision loop treats that as a bounded
    /// retry signal, never a crash.
    fn propose(&self, context: &str) -> Result<ProposedAction, LlmError>;

    /// Segment raw text into a `{topic: [sentences]}` JSON object.
    ///
    /// Returns the model's raw reply; lenient parsing (including repair of
    /// truncated JSON) happens in [`crate::memory::parse_segments`].
    fn segment(&self, raw: &str) -> Result<String, LlmError>;

    /// Extract facts worth remembering long-term from the rendered context.
    ///
    /// Expected shape is a JSON object with a `memories` array of sentences;
    /// parsing is again lenient on the core side.
    fn extract_memories(&self, context: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposed_action_roundtrips_through_json() {
        let raw = r#"{"name": "search", "params": {"query": "weather in Champaign"}}"#;
        let action: ProposedAction = serde_json::from_str(raw).unwrap();
        assert_eq!(action.name, "search");
        assert_eq!(action.params["query"], "weather in Champaign");
    }

    #[test]
    fn missing_params_defaults_to_null() {
        let action: ProposedAction = serde_json::from_str(r#"{"name": "wait"}"#).unwrap();
        assert!(action.params.is_null());
    }
}
