// Typed suite model
// Immutable after parse; the engine only ever reads these structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Error from parsing a suite document
#[derive(Debug, thiserror::Error)]
pub enum SuiteParseError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A suite: one YAML file of tests plus shared vars and hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    /// Shared variables, referenced as `{{ .vars.KEY }}` (dotted paths
    /// address nested maps)
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,

    /// OpenAPI spec reference passed through to plugins that want it
    #[serde(default)]
    pub openapi: Option<Value>,

    /// Suite-level init steps, run once by the coordinator before any test
    #[serde(default)]
    pub init: Vec<Step>,

    /// Suite-level cleanup, run once by the coordinator after all tests
    #[serde(default)]
    pub cleanup: Option<CleanupHooks>,

    pub tests: Vec<Test>,
}

impl Suite {
    /// Parse a suite from YAML bytes
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, SuiteParseError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Parse a suite from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, SuiteParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Flatten `vars` into dotted-path form: `{a: {b: 1}}` → `{"a.b": "1"}`
    ///
    /// Leaf values are stringified the same way runtime state is: strings
    /// bare, everything else as JSON.
    pub fn flattened_vars(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.vars {
            flatten_into(&mut out, key, value);
        }
        out
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(out, &format!("{}.{}", prefix, key), nested);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// One test: an ordered sequence of steps with optional lifecycle hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Test {
    pub name: String,

    /// Init steps run before main steps; a failure here fails the test
    /// before main execution but still triggers cleanups
    #[serde(default)]
    pub init: Vec<Step>,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub cleanup: Option<CleanupHooks>,
}

/// Cleanup hook sequences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupHooks {
    /// Run unconditionally after main steps (and after `on_failure`)
    #[serde(default)]
    pub always: Vec<Step>,

    /// Run only when the test failed
    #[serde(default)]
    pub on_failure: Vec<Step>,
}

/// One plugin invocation with config, retry, assertions, and save spec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub name: String,

    /// Registered plugin identifier ("http", "delay", "log", …)
    pub plugin: String,

    /// Opaque to the engine; each plugin validates its own shape.
    /// Template references are resolved here before dispatch.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Declarative checks the plugin evaluates after its operation
    #[serde(default)]
    pub assertions: Vec<Value>,

    /// Extractors that pull values from the plugin response into runtime state
    #[serde(default)]
    pub save: Vec<SaveSpec>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Per-step activity timeout override (Go-style duration string)
    #[serde(default)]
    pub timeout: Option<String>,
}

/// A `{ json_path | header, as }` extractor spec
///
/// Exactly one of `json_path` or `header` must be set; `validate`
/// enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveSpec {
    #[serde(default)]
    pub json_path: Option<String>,

    #[serde(default)]
    pub header: Option<String>,

    /// Runtime-state key the extracted value is stored under
    #[serde(rename = "as")]
    pub save_as: String,

    /// When false, a missing value is skipped instead of failing the step
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// Per-step retry configuration; absence means exactly one attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before the first retry (Go-style duration string)
    #[serde(default)]
    pub initial_interval: Option<String>,

    /// Upper bound on the backoff delay
    #[serde(default)]
    pub maximum_interval: Option<String>,

    /// Total attempts including the first; must be >= 1
    #[serde(default)]
    pub maximum_attempts: Option<u32>,

    #[serde(default)]
    pub backoff_coefficient: Option<f64>,

    /// Error types that should fail immediately instead of retrying
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}
