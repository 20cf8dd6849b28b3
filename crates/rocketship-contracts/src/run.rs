// Run-related DTOs for the public API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A run is one submission of a suite: the root of the test/step tree
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Run {
    pub id: Uuid,
    pub project_id: String,
    pub source: String,
    pub branch: Option<String>,
    pub trigger: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tests: Vec<TestExecution>,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Passed => write!(f, "PASSED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "PASSED" => Ok(RunStatus::Passed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELED" => Ok(RunStatus::Canceled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// One execution of one test within a run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestExecution {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Workflow identifier, unique per test execution
    pub workflow_id: String,
    pub name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<crate::step::StepRecord>,
}

/// Caller-supplied context attached to a run at creation
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RunContext {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Filter for listing runs
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RunFilter {
    pub project_id: Option<String>,
    pub source: Option<String>,
    pub branch: Option<String>,
    pub status: Option<RunStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Sort key for listing runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunOrderBy {
    #[default]
    StartedAt,
    Duration,
}

/// Ordering for listing runs; defaults to most-recent first
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct RunOrder {
    #[serde(default)]
    pub order_by: RunOrderBy,
    #[serde(default)]
    pub ascending: bool,
}

impl Default for RunOrder {
    fn default() -> Self {
        Self {
            order_by: RunOrderBy::StartedAt,
            ascending: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Passed,
            RunStatus::Failed,
            RunStatus::Canceled,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(RunStatus::Passed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_run_status_serde_uses_wire_casing() {
        let json = serde_json::to_string(&RunStatus::Passed).unwrap();
        assert_eq!(json, "\"PASSED\"");
    }

    #[test]
    fn test_run_order_default_is_started_at_desc() {
        let order = RunOrder::default();
        assert_eq!(order.order_by, RunOrderBy::StartedAt);
        assert!(!order.ascending);
    }
}
