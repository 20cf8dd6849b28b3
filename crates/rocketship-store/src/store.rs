// RunStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocketship_contracts::{LogEntry, Run, RunFilter, RunOrder, RunStatus, StepRecord, TestExecution};
use uuid::Uuid;

/// Minimum length of a run-id prefix accepted by lookup
pub const MIN_PREFIX_LEN: usize = 12;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No run matches the identifier
    #[error("run not found: {0}")]
    NotFound(String),

    /// More than one run matches the prefix
    #[error("identifier '{0}' matches more than one run")]
    AmbiguousIdentifier(String),

    /// Identifier is neither a full id nor a usable prefix
    #[error("identifier '{0}' must be a run id or a prefix of at least 12 characters")]
    InvalidIdentifier(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Input for creating a run
#[derive(Debug, Clone)]
pub struct NewRun {
    pub project_id: String,
    pub source: String,
    pub branch: Option<String>,
    pub trigger: Option<String>,
    pub metadata: serde_json::Value,
}

impl Default for NewRun {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            source: "cli-local".to_string(),
            branch: None,
            trigger: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A step row with its streaming cursor
#[derive(Debug, Clone)]
pub struct StoredStep {
    pub id: Uuid,
    /// Monotonic change sequence; bumped on every upsert so stream
    /// subscribers see updates, not just inserts
    pub update_seq: i64,
    pub record: StepRecord,
}

/// A log row with its append sequence
#[derive(Debug, Clone)]
pub struct StoredLog {
    pub id: i64,
    pub entry: LogEntry,
}

/// Storage seam for runs, test executions, steps, and logs
///
/// All writes are transactional per upsert; log append order is
/// preserved within `(run_id, workflow_id)`.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    /// Create a run in PENDING state, assigning id and start time
    async fn create_run(&self, input: NewRun) -> Result<Run, StoreError>;

    /// Transition a run's status; terminal transitions set `ended_at`
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Fetch a run with nested tests and steps
    async fn get_run(&self, run_id: Uuid) -> Result<Run, StoreError>;

    /// Fetch by exact id or unique prefix (min 12 chars)
    async fn find_run(&self, id_or_prefix: &str) -> Result<Run, StoreError>;

    /// List runs matching the filter, ordered and optionally limited.
    /// Results carry no nested tests.
    async fn list_runs(
        &self,
        filter: &RunFilter,
        order: RunOrder,
        limit: Option<i64>,
    ) -> Result<Vec<Run>, StoreError>;

    /// Upsert a test execution keyed by `(run_id, workflow_id)`
    async fn upsert_test(&self, execution: TestExecution) -> Result<Uuid, StoreError>;

    /// Upsert a step keyed by `(run_id, workflow_id, step_index)`
    async fn upsert_step(&self, record: StepRecord) -> Result<Uuid, StoreError>;

    /// Append a log entry; returns its sequence id
    async fn append_log(&self, entry: LogEntry) -> Result<i64, StoreError>;

    /// Step changes for a run after the given cursor, oldest first
    async fn list_steps_since(
        &self,
        run_id: Uuid,
        after_seq: i64,
    ) -> Result<Vec<StoredStep>, StoreError>;

    /// Log entries for a run after the given cursor, oldest first
    async fn list_logs_since(
        &self,
        run_id: Uuid,
        after_id: i64,
    ) -> Result<Vec<StoredLog>, StoreError>;
}

/// Shared prefix-resolution rule: exact id, else unique prefix
///
/// `candidates` are the string forms of every known run id that starts
/// with the identifier (the store narrows before calling).
pub(crate) fn resolve_prefix(
    id_or_prefix: &str,
    candidates: &[Uuid],
) -> Result<Uuid, StoreError> {
    match candidates {
        [] => Err(StoreError::NotFound(id_or_prefix.to_string())),
        [single] => Ok(*single),
        _ => Err(StoreError::AmbiguousIdentifier(id_or_prefix.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefix_unique() {
        let id = Uuid::now_v7();
        assert_eq!(resolve_prefix("0191", &[id]).unwrap(), id);
    }

    #[test]
    fn test_resolve_prefix_none() {
        assert!(matches!(
            resolve_prefix("0191", &[]),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_prefix_ambiguous() {
        let result = resolve_prefix("0191", &[Uuid::now_v7(), Uuid::now_v7()]);
        assert!(matches!(result, Err(StoreError::AmbiguousIdentifier(_))));
    }
}
