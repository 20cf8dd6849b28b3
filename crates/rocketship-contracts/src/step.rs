// Step record DTOs
// A StepRecord is the persisted view of one plugin invocation. It is
// upsert-keyed by (run_id, workflow_id, step_index) so the RUNNING entry
// and the terminal entry land on the same row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "PENDING"),
            StepStatus::Running => write!(f, "RUNNING"),
            StepStatus::Passed => write!(f, "PASSED"),
            StepStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "PASSED" => Ok(StepStatus::Passed),
            "FAILED" => Ok(StepStatus::Failed),
            _ => Err(format!("Unknown step status: {}", s)),
        }
    }
}

/// Persisted record of one step execution
///
/// The JSON blob fields (`request`, `response`, `assertions`, `variables`,
/// `step_config`) are serialized with the deterministic encoder so replayed
/// executions produce byte-identical records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepRecord {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub step_index: i32,
    pub name: String,
    pub plugin: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub assertions_passed: i32,
    #[serde(default)]
    pub assertions_failed: i32,
    /// Request snapshot as deterministic JSON, when the plugin supplied one
    pub request: Option<String>,
    /// Response snapshot as deterministic JSON, when the plugin supplied one
    pub response: Option<String>,
    /// Per-assertion results as deterministic JSON
    pub assertions: Option<String>,
    /// Variables visible to and produced by this step, see [`VariablesSnapshot`]
    pub variables: Option<String>,
    /// The step's config exactly as authored, before template resolution
    pub step_config: Option<String>,
}

/// Provenance-bucketed variables attached to a StepRecord
///
/// `config` holds suite vars (stringified), `runtime` the saved values
/// visible before the step ran, and `saved` the values this step produced
/// with the extractor that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VariablesSnapshot {
    #[serde(default)]
    pub config: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub runtime: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub saved: Vec<SavedValue>,
}

/// One value a step saved into runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SavedValue {
    pub name: String,
    pub value: String,
    /// Extractor that produced the value: "json_path", "header", or "auto"
    pub extractor: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_roundtrip() {
        for status in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Passed,
            StepStatus::Failed,
        ] {
            let parsed: StepStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_variables_snapshot_buckets() {
        let mut snapshot = VariablesSnapshot::default();
        snapshot
            .config
            .insert("api".to_string(), "https://x".to_string());
        snapshot.saved.push(SavedValue {
            name: "uid".to_string(),
            value: "42".to_string(),
            extractor: "json_path".to_string(),
        });

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: VariablesSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
