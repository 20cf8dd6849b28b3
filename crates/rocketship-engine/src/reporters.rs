// Event reporters
//
// Two activities carry observability out of the workflow plane: the step
// reporter (idempotent upsert keyed by run/workflow/step_index) and the
// log forwarder (append-only). Both retry a bounded number of times and
// are then dropped with a warning — they are observability, not
// correctness, and must never fail the workflow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rocketship_contracts::{LogEntry, StepRecord, TestExecution};
use rocketship_durable::{
    ActivityError, ActivityOptions, ActivityRegistry, RetryPolicy, WorkflowContext,
};
use tracing::warn;

/// Activity type for step upserts
pub const STEP_REPORT_ACTIVITY: &str = "report.step";

/// Activity type for log appends
pub const LOG_FORWARD_ACTIVITY: &str = "report.log";

/// Activity type for test-execution upserts
pub const TEST_REPORT_ACTIVITY: &str = "report.test";

/// Error from a report sink
#[derive(Debug, thiserror::Error)]
#[error("persistence error: {0}")]
pub struct SinkError(pub String);

/// Engine-facade boundary the reporters post through
///
/// The engine service implements this over the run store and its
/// streaming fan-out; tests use an in-memory sink.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn upsert_step(&self, record: StepRecord) -> Result<(), SinkError>;

    async fn append_log(&self, entry: LogEntry) -> Result<(), SinkError>;

    async fn upsert_test(&self, execution: TestExecution) -> Result<(), SinkError>;
}

/// Install the reporter activities over a sink
pub fn register_reporters(activities: &mut ActivityRegistry, sink: Arc<dyn ReportSink>) {
    let step_sink = sink.clone();
    activities.register(STEP_REPORT_ACTIVITY, move |_ctx, input| {
        let sink = step_sink.clone();
        async move {
            let record: StepRecord = serde_json::from_value(input)
                .map_err(|e| ActivityError::permanent(format!("invalid step record: {}", e)))?;
            sink.upsert_step(record)
                .await
                .map_err(|e| ActivityError::transient(e.to_string()))?;
            Ok(serde_json::Value::Null)
        }
    });

    let log_sink = sink.clone();
    activities.register(LOG_FORWARD_ACTIVITY, move |_ctx, input| {
        let sink = log_sink.clone();
        async move {
            let entry: LogEntry = serde_json::from_value(input)
                .map_err(|e| ActivityError::permanent(format!("invalid log entry: {}", e)))?;
            sink.append_log(entry)
                .await
                .map_err(|e| ActivityError::transient(e.to_string()))?;
            Ok(serde_json::Value::Null)
        }
    });

    activities.register(TEST_REPORT_ACTIVITY, move |_ctx, input| {
        let sink = sink.clone();
        async move {
            let execution: TestExecution = serde_json::from_value(input).map_err(|e| {
                ActivityError::permanent(format!("invalid test execution: {}", e))
            })?;
            sink.upsert_test(execution)
                .await
                .map_err(|e| ActivityError::transient(e.to_string()))?;
            Ok(serde_json::Value::Null)
        }
    });
}

/// Dispatch options for reporter activities: three short fixed-interval
/// attempts, then the caller drops the report
fn reporter_options() -> ActivityOptions {
    ActivityOptions::default()
        .with_retry(RetryPolicy::spaced(Duration::from_millis(250), 3))
        .with_start_to_close_timeout(Duration::from_secs(30))
}

/// Upsert a step record; failures are logged and swallowed
pub async fn report_step(ctx: &dyn WorkflowContext, record: &StepRecord) {
    let input = match serde_json::to_value(record) {
        Ok(input) => input,
        Err(e) => {
            warn!(error = %e, "step record serialization failed, report dropped");
            return;
        }
    };

    if let Err(error) = ctx
        .execute_activity(STEP_REPORT_ACTIVITY, input, reporter_options())
        .await
    {
        warn!(
            workflow_id = %ctx.workflow_id(),
            step_index = record.step_index,
            error = %error.message,
            "step report dropped after retries"
        );
    }
}

/// Append a log entry; failures are logged and swallowed
pub async fn forward_log(ctx: &dyn WorkflowContext, entry: &LogEntry) {
    let input = match serde_json::to_value(entry) {
        Ok(input) => input,
        Err(e) => {
            warn!(error = %e, "log entry serialization failed, entry dropped");
            return;
        }
    };

    if let Err(error) = ctx
        .execute_activity(LOG_FORWARD_ACTIVITY, input, reporter_options())
        .await
    {
        warn!(
            workflow_id = %ctx.workflow_id(),
            error = %error.message,
            "log entry dropped after retries"
        );
    }
}

/// Upsert a test execution row; failures are logged and swallowed
pub async fn report_test(ctx: &dyn WorkflowContext, execution: &TestExecution) {
    let input = match serde_json::to_value(execution) {
        Ok(input) => input,
        Err(e) => {
            warn!(error = %e, "test execution serialization failed, report dropped");
            return;
        }
    };

    if let Err(error) = ctx
        .execute_activity(TEST_REPORT_ACTIVITY, input, reporter_options())
        .await
    {
        warn!(
            workflow_id = %ctx.workflow_id(),
            error = %error.message,
            "test execution report dropped after retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rocketship_contracts::StepStatus;
    use rocketship_durable::LocalRuntime;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        steps: Mutex<Vec<StepRecord>>,
        logs: Mutex<Vec<LogEntry>>,
        fail_attempts: Mutex<u32>,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn upsert_step(&self, record: StepRecord) -> Result<(), SinkError> {
            let mut remaining = self.fail_attempts.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError("store unavailable".to_string()));
            }
            self.steps.lock().push(record);
            Ok(())
        }

        async fn append_log(&self, entry: LogEntry) -> Result<(), SinkError> {
            self.logs.lock().push(entry);
            Ok(())
        }

        async fn upsert_test(&self, _execution: TestExecution) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn sample_record() -> StepRecord {
        StepRecord {
            run_id: Uuid::now_v7(),
            workflow_id: "wf-1".to_string(),
            step_index: 0,
            name: "step".to_string(),
            plugin: "http".to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            error_message: None,
            assertions_passed: 0,
            assertions_failed: 0,
            request: None,
            response: None,
            assertions: None,
            variables: None,
            step_config: None,
        }
    }

    #[tokio::test]
    async fn test_step_report_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let mut activities = ActivityRegistry::new();
        register_reporters(&mut activities, sink.clone());

        let runtime = LocalRuntime::new(activities);
        let ctx = runtime.start_workflow("wf-1", json!({}));

        report_step(ctx.as_ref(), &sample_record()).await;
        assert_eq!(sink.steps.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_sink_failure_retried() {
        let sink = Arc::new(RecordingSink {
            fail_attempts: Mutex::new(2),
            ..Default::default()
        });
        let mut activities = ActivityRegistry::new();
        register_reporters(&mut activities, sink.clone());

        let runtime = LocalRuntime::new(activities);
        let ctx = runtime.start_workflow("wf-1", json!({}));

        // Two failures then success, within the three-attempt budget
        report_step(ctx.as_ref(), &sample_record()).await;
        assert_eq!(sink.steps.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_sink_failure_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail_attempts: Mutex::new(10),
            ..Default::default()
        });
        let mut activities = ActivityRegistry::new();
        register_reporters(&mut activities, sink.clone());

        let runtime = LocalRuntime::new(activities);
        let ctx = runtime.start_workflow("wf-1", json!({}));

        // Never panics or propagates; the report is simply dropped
        report_step(ctx.as_ref(), &sample_record()).await;
        assert!(sink.steps.lock().is_empty());
    }

    #[tokio::test]
    async fn test_log_forwarding() {
        let sink = Arc::new(RecordingSink::default());
        let mut activities = ActivityRegistry::new();
        register_reporters(&mut activities, sink.clone());

        let runtime = LocalRuntime::new(activities);
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let entry = LogEntry {
            run_id: Uuid::now_v7(),
            workflow_id: "wf-1".to_string(),
            test_name: Some("t".to_string()),
            step_name: Some("s".to_string()),
            message: "hello".to_string(),
            color: Some("green".to_string()),
            bold: false,
            timestamp: Utc::now(),
        };
        forward_log(ctx.as_ref(), &entry).await;

        let logs = sink.logs.lock();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "hello");
    }
}
