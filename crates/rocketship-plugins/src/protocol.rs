// The plugin activity envelope
// Inputs and outputs cross the activity boundary as JSON; the types here
// define the shape both sides agree on.

use rocketship_durable::ActivityError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Input handed to every plugin activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInput {
    /// Step name, for log attribution
    pub name: String,

    /// Plugin identifier the step addressed
    pub plugin: String,

    /// Step config after template resolution
    pub config: BTreeMap<String, Value>,

    /// Snapshot of runtime state visible to this step
    #[serde(default)]
    pub state: BTreeMap<String, String>,

    /// Snapshot of suite vars (flattened, stringified)
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    pub run: RunRef,

    /// Assertion specs the plugin evaluates after its operation
    #[serde(default)]
    pub assertions: Vec<Value>,

    /// Save specs, for plugins that perform their own extraction
    #[serde(default)]
    pub save: Vec<rocketship_dsl::SaveSpec>,

    /// Suite-level OpenAPI document, for plugins that validate against it
    #[serde(default)]
    pub suite_openapi: Option<Value>,
}

/// Reference to the owning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRef {
    pub id: String,
}

/// Successful plugin result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginOutput {
    /// Values to merge into runtime state; plugins that extract themselves
    /// return them here, otherwise the interpreter applies the save specs
    #[serde(default)]
    pub saved: BTreeMap<String, String>,

    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,

    /// Request/response snapshots for the UI
    #[serde(default)]
    pub ui_payload: Option<UiPayload>,

    /// Present when the plugin is a logger source; the interpreter routes
    /// it to the log forwarder
    #[serde(default)]
    pub log_message: Option<String>,

    #[serde(default)]
    pub log_color: Option<String>,

    #[serde(default)]
    pub log_bold: bool,
}

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    /// Index into the step's assertion list
    pub index: usize,

    pub assertion_type: String,

    pub passed: bool,

    #[serde(default)]
    pub detail: Option<String>,
}

/// Request/response snapshots a plugin surfaces for rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiPayload {
    #[serde(default)]
    pub request: Option<Value>,

    #[serde(default)]
    pub response: Option<Value>,
}

/// Failure classes a plugin can return
///
/// The taxonomy is shared with the substrate: it is the same
/// [`FailureKind`](rocketship_durable::FailureKind) the retry machinery
/// keys off, so a plugin's classification carries through unchanged.
pub type PluginErrorKind = rocketship_durable::FailureKind;

/// Typed plugin failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub message: String,
    /// Structured payload surfaced alongside the failure (e.g. the HTTP
    /// plugin attaches request/response even on assertion failure)
    pub details: Option<Value>,
}

impl PluginError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: PluginErrorKind::Transient,
            message: message.into(),
            details: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: PluginErrorKind::Permanent,
            message: message.into(),
            details: None,
        }
    }

    pub fn assertion_failed(message: impl Into<String>, details: Value) -> Self {
        Self {
            kind: PluginErrorKind::AssertionFailed,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert into the substrate's activity error envelope
    ///
    /// The kind maps one-to-one; nothing is lost crossing the boundary.
    pub fn into_activity_error(self) -> ActivityError {
        ActivityError {
            kind: self.kind,
            message: self.message,
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(PluginErrorKind::Transient.as_str(), "transient");
        assert_eq!(PluginErrorKind::AssertionFailed.as_str(), "assertion_failed");
    }

    #[test]
    fn test_error_mapping_retryability() {
        let err = PluginError::transient("connection reset").into_activity_error();
        assert!(err.retryable());
        assert_eq!(err.kind, PluginErrorKind::Transient);

        let err = PluginError::permanent("bad config").into_activity_error();
        assert!(!err.retryable());

        let err = PluginError::assertion_failed(
            "expected 200, got 404",
            json!({"response": {"status": 404}}),
        )
        .into_activity_error();
        assert!(!err.retryable());
        assert_eq!(err.kind, PluginErrorKind::AssertionFailed);
        assert!(err.details.is_some());
    }

    #[test]
    fn test_output_default_is_empty() {
        let output = PluginOutput::default();
        assert!(output.saved.is_empty());
        assert!(output.assertion_results.is_empty());
        assert!(output.log_message.is_none());
        assert!(!output.log_bold);
    }

    #[test]
    fn test_input_roundtrip() {
        let input = PluginInput {
            name: "create user".to_string(),
            plugin: "http".to_string(),
            config: BTreeMap::from([("url".to_string(), json!("https://x/users"))]),
            state: BTreeMap::from([("uid".to_string(), "42".to_string())]),
            vars: BTreeMap::new(),
            run: RunRef {
                id: "run-1".to_string(),
            },
            assertions: vec![json!({"type": "status_code", "expected": 200})],
            save: vec![],
            suite_openapi: None,
        };

        let encoded = serde_json::to_value(&input).unwrap();
        let parsed: PluginInput = serde_json::from_value(encoded).unwrap();
        assert_eq!(parsed.name, "create user");
        assert_eq!(parsed.state.get("uid").map(String::as_str), Some("42"));
    }
}
