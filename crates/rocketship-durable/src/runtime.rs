//! In-process substrate implementation
//!
//! `LocalRuntime` executes activities on the worker plane (tokio tasks)
//! under timeout and retry enforcement, keeps an append-only journal per
//! workflow execution, and hands out [`WorkflowContext`] handles with
//! cancellation tokens. Disconnected contexts share the journal but carry
//! a fresh token, so cleanup work keeps running after a cancel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity::{ActivityContext, ActivityError, ActivityRegistry, FailureKind};
use crate::context::{ActivityOptions, WorkflowContext};
use crate::event::WorkflowEvent;

/// Marker the substrate appends to an error message when retries are
/// exhausted. Wrapping stacks as errors cross workflow layers; consumers
/// truncate at the first occurrence to recover the underlying message.
pub const RETRY_WRAP_MARKER: &str = " (activity retry state:";

/// Append the substrate's retry-state suffix to an exhausted error
fn wrap_retry_state(mut error: ActivityError, attempt: u32, max_attempts: u32) -> ActivityError {
    error.message = format!(
        "{}{} attempt {} of {})",
        error.message, RETRY_WRAP_MARKER, attempt, max_attempts
    );
    error
}

/// The in-process workflow substrate
///
/// # Example
///
/// ```ignore
/// let mut activities = ActivityRegistry::new();
/// activities.register("plugin.http", http_activity);
///
/// let runtime = LocalRuntime::new(activities);
/// let ctx = runtime.start_workflow("run-1-test-0", json!({}));
/// let result = ctx.execute_activity("plugin.http", input, options).await?;
/// ```
pub struct LocalRuntime {
    activities: ActivityRegistry,
    journals: RwLock<HashMap<String, Vec<WorkflowEvent>>>,
    cancellations: RwLock<HashMap<String, CancellationToken>>,
}

impl LocalRuntime {
    /// Create a runtime over the given activity registry
    pub fn new(activities: ActivityRegistry) -> Arc<Self> {
        Arc::new(Self {
            activities,
            journals: RwLock::new(HashMap::new()),
            cancellations: RwLock::new(HashMap::new()),
        })
    }

    /// Registered activities
    pub fn activities(&self) -> &ActivityRegistry {
        &self.activities
    }

    /// Start a workflow execution: journal the input, return its context
    pub fn start_workflow(
        self: &Arc<Self>,
        workflow_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Arc<dyn WorkflowContext> {
        let workflow_id = workflow_id.into();
        self.record(&workflow_id, WorkflowEvent::WorkflowStarted { input });

        let token = self
            .cancellations
            .write()
            .entry(workflow_id.clone())
            .or_insert_with(CancellationToken::new)
            .clone();

        Arc::new(LocalContext {
            runtime: self.clone(),
            workflow_id,
            cancellation: token,
        })
    }

    /// Record the terminal event for a workflow execution
    pub fn finish_workflow(
        &self,
        workflow_id: &str,
        outcome: Result<serde_json::Value, ActivityError>,
    ) {
        let event = match outcome {
            Ok(result) => WorkflowEvent::WorkflowCompleted { result },
            Err(error) if error.kind == FailureKind::Canceled => {
                WorkflowEvent::WorkflowCancelled {
                    reason: error.message,
                }
            }
            Err(error) => WorkflowEvent::WorkflowFailed { error },
        };
        self.record(workflow_id, event);
    }

    /// Request cancellation of a workflow execution
    ///
    /// In-flight activities and sleeps on the workflow's root context
    /// return canceled errors; disconnected contexts are unaffected.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        let cancellations = self.cancellations.read();
        match cancellations.get(workflow_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every workflow whose id starts with the given prefix
    ///
    /// Runs are fanned out as one workflow per test with a shared id
    /// prefix, so canceling a run means canceling the family.
    pub fn cancel_prefix(&self, prefix: &str) -> usize {
        let cancellations = self.cancellations.read();
        let mut count = 0;
        for (workflow_id, token) in cancellations.iter() {
            if workflow_id.starts_with(prefix) {
                token.cancel();
                count += 1;
            }
        }
        count
    }

    /// Snapshot of a workflow's journal
    pub fn journal(&self, workflow_id: &str) -> Vec<WorkflowEvent> {
        self.journals
            .read()
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, workflow_id: &str, event: WorkflowEvent) {
        let mut journals = self.journals.write();
        journals
            .entry(workflow_id.to_string())
            .or_default()
            .push(event);
    }

    fn next_sequence(&self, workflow_id: &str, kind: &str) -> usize {
        let journals = self.journals.read();
        let Some(journal) = journals.get(workflow_id) else {
            return 0;
        };
        match kind {
            "activity" => journal
                .iter()
                .filter(|e| matches!(e, WorkflowEvent::ActivityScheduled { .. }))
                .count(),
            _ => journal
                .iter()
                .filter(|e| matches!(e, WorkflowEvent::TimerStarted { .. }))
                .count(),
        }
    }
}

struct LocalContext {
    runtime: Arc<LocalRuntime>,
    workflow_id: String,
    cancellation: CancellationToken,
}

#[async_trait::async_trait]
impl WorkflowContext for LocalContext {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    async fn execute_activity(
        &self,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, ActivityError> {
        let policy = options.retry_policy;
        let sequence = self.runtime.next_sequence(&self.workflow_id, "activity");
        let activity_id = format!("{}-{}", activity_type, sequence);

        self.runtime.record(
            &self.workflow_id,
            WorkflowEvent::ActivityScheduled {
                activity_id: activity_id.clone(),
                activity_type: activity_type.to_string(),
                input: input.clone(),
            },
        );

        let activity = self
            .runtime
            .activities
            .get(activity_type)
            .cloned()
            .ok_or_else(|| {
                ActivityError::permanent(format!("unknown activity type: {}", activity_type))
            })?;

        let mut attempt: u32 = 1;
        loop {
            if self.cancellation.is_cancelled() {
                self.record_cancelled(&activity_id);
                return Err(self.canceled_error());
            }

            self.runtime.record(
                &self.workflow_id,
                WorkflowEvent::ActivityStarted {
                    activity_id: activity_id.clone(),
                    attempt,
                },
            );
            debug!(
                workflow_id = %self.workflow_id,
                %activity_id,
                attempt,
                "executing activity"
            );

            let ctx = ActivityContext::new(
                self.workflow_id.clone(),
                activity_id.clone(),
                attempt,
                policy.max_attempts,
                self.cancellation.clone(),
            );

            let outcome = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    self.record_cancelled(&activity_id);
                    return Err(self.canceled_error());
                }
                outcome = tokio::time::timeout(
                    options.start_to_close_timeout,
                    activity(ctx, input.clone()),
                ) => outcome,
            };

            let error = match outcome {
                Ok(Ok(result)) => {
                    self.runtime.record(
                        &self.workflow_id,
                        WorkflowEvent::ActivityCompleted {
                            activity_id: activity_id.clone(),
                            result: result.clone(),
                        },
                    );
                    return Ok(result);
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => {
                    self.runtime.record(
                        &self.workflow_id,
                        WorkflowEvent::ActivityTimedOut {
                            activity_id: activity_id.clone(),
                            attempt,
                        },
                    );
                    ActivityError::timeout(format!(
                        "activity '{}' timed out after {:?}",
                        activity_type, options.start_to_close_timeout
                    ))
                }
            };

            let will_retry = error.retryable()
                && policy.allows_another_attempt(attempt)
                && policy.retries(error.kind.as_str());

            self.runtime.record(
                &self.workflow_id,
                WorkflowEvent::ActivityFailed {
                    activity_id: activity_id.clone(),
                    error: error.clone(),
                    will_retry,
                },
            );

            if !will_retry {
                warn!(
                    workflow_id = %self.workflow_id,
                    %activity_id,
                    attempt,
                    error = %error.message,
                    "activity failed, retries exhausted"
                );
                return Err(wrap_retry_state(error, attempt, policy.max_attempts));
            }

            let delay = policy.delay_before(attempt + 1);
            debug!(
                workflow_id = %self.workflow_id,
                %activity_id,
                attempt,
                ?delay,
                "activity failed, backing off before retry"
            );
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    self.record_cancelled(&activity_id);
                    return Err(self.canceled_error());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), ActivityError> {
        let sequence = self.runtime.next_sequence(&self.workflow_id, "timer");
        let timer_id = format!("timer-{}", sequence);

        self.runtime.record(
            &self.workflow_id,
            WorkflowEvent::TimerStarted {
                timer_id: timer_id.clone(),
                duration_ms: duration.as_millis() as u64,
            },
        );

        tokio::select! {
            _ = self.cancellation.cancelled() => {
                self.runtime.record(
                    &self.workflow_id,
                    WorkflowEvent::TimerCancelled { timer_id },
                );
                Err(self.canceled_error())
            }
            _ = tokio::time::sleep(duration) => {
                self.runtime.record(
                    &self.workflow_id,
                    WorkflowEvent::TimerFired { timer_id },
                );
                Ok(())
            }
        }
    }

    fn new_disconnected(&self) -> Arc<dyn WorkflowContext> {
        Arc::new(LocalContext {
            runtime: self.runtime.clone(),
            workflow_id: self.workflow_id.clone(),
            cancellation: CancellationToken::new(),
        })
    }
}

impl LocalContext {
    fn canceled_error(&self) -> ActivityError {
        ActivityError::canceled(format!("workflow {} canceled", self.workflow_id))
    }

    fn record_cancelled(&self, activity_id: &str) {
        self.runtime.record(
            &self.workflow_id,
            WorkflowEvent::ActivityCancelled {
                activity_id: activity_id.to_string(),
                reason: "workflow canceled".to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_registry(counter: Arc<AtomicU32>, fail: bool) -> ActivityRegistry {
        let mut registry = ActivityRegistry::new();
        registry.register("work", move |_ctx, _input| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(ActivityError::transient("boom"))
                } else {
                    Ok(json!({"ok": true}))
                }
            }
        });
        registry
    }

    #[tokio::test]
    async fn test_successful_activity() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = LocalRuntime::new(counting_registry(counter.clone(), false));
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let result = ctx
            .execute_activity("work", json!({}), ActivityOptions::default())
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let journal = runtime.journal("wf-1");
        assert!(matches!(journal[0], WorkflowEvent::WorkflowStarted { .. }));
        assert!(journal
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ActivityCompleted { .. })));
    }

    #[tokio::test]
    async fn test_no_policy_means_single_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = LocalRuntime::new(counting_registry(counter.clone(), true));
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let err = ctx
            .execute_activity("work", json!({}), ActivityOptions::default())
            .await
            .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(err.message.contains(RETRY_WRAP_MARKER));
        assert!(err.message.starts_with("boom"));
    }

    #[tokio::test]
    async fn test_retry_policy_bounds_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = LocalRuntime::new(counting_registry(counter.clone(), true));
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let options = ActivityOptions::default()
            .with_retry(RetryPolicy::geometric(Duration::from_millis(5)).with_attempts(3));

        let err = ctx
            .execute_activity("work", json!({}), options)
            .await
            .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(err.message.contains("attempt 3 of 3"));

        // Journal shows two will_retry failures then a terminal one
        let journal = runtime.journal("wf-1");
        let retries: Vec<bool> = journal
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::ActivityFailed { will_retry, .. } => Some(*will_retry),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut registry = ActivityRegistry::new();
        let c = counter.clone();
        registry.register("work", move |_ctx, _input| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ActivityError::permanent("bad request"))
            }
        });

        let runtime = LocalRuntime::new(registry);
        let ctx = runtime.start_workflow("wf-1", json!({}));
        let options = ActivityOptions::default()
            .with_retry(RetryPolicy::spaced(Duration::from_millis(1), 5));

        let err = ctx
            .execute_activity("work", json!({}), options)
            .await
            .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind, FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_blocked_error_types_skip_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = LocalRuntime::new(counting_registry(counter.clone(), true));
        let ctx = runtime.start_workflow("wf-1", json!({}));

        // "transient" is retryable by nature but blocked by the policy
        let options = ActivityOptions::default().with_retry(
            RetryPolicy::spaced(Duration::from_millis(1), 5)
                .with_blocked_error_type("transient"),
        );

        ctx.execute_activity("work", json!({}), options)
            .await
            .unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_activity_type() {
        let runtime = LocalRuntime::new(ActivityRegistry::new());
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let err = ctx
            .execute_activity("missing", json!({}), ActivityOptions::default())
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown activity type"));
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        let mut registry = ActivityRegistry::new();
        registry.register("slow", |_ctx, _input| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        });

        let runtime = LocalRuntime::new(registry);
        let ctx = runtime.start_workflow("wf-1", json!({}));
        let options =
            ActivityOptions::default().with_start_to_close_timeout(Duration::from_millis(20));

        let err = ctx
            .execute_activity("slow", json!({}), options)
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));

        let journal = runtime.journal("wf-1");
        assert!(journal
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ActivityTimedOut { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let runtime = LocalRuntime::new(ActivityRegistry::new());
        let ctx = runtime.start_workflow("wf-1", json!({}));

        let sleeper = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.sleep(Duration::from_secs(3600)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runtime.cancel("wf-1"));

        let result = sleeper.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.kind, FailureKind::Canceled);

        let journal = runtime.journal("wf-1");
        assert!(journal
            .iter()
            .any(|e| matches!(e, WorkflowEvent::TimerCancelled { .. })));
    }

    #[tokio::test]
    async fn test_disconnected_context_survives_cancel() {
        let counter = Arc::new(AtomicU32::new(0));
        let runtime = LocalRuntime::new(counting_registry(counter.clone(), false));
        let ctx = runtime.start_workflow("wf-1", json!({}));
        let detached = ctx.new_disconnected();

        runtime.cancel("wf-1");
        assert!(ctx.is_cancelled());
        assert!(!detached.is_cancelled());

        // Activity still runs on the disconnected context
        let result = detached
            .execute_activity("work", json!({}), ActivityOptions::default())
            .await;
        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prefix() {
        let runtime = LocalRuntime::new(ActivityRegistry::new());
        let a = runtime.start_workflow("run-1-test-0", json!({}));
        let b = runtime.start_workflow("run-1-test-1", json!({}));
        let other = runtime.start_workflow("run-2-test-0", json!({}));

        assert_eq!(runtime.cancel_prefix("run-1"), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!other.is_cancelled());
    }

    #[tokio::test]
    async fn test_finish_workflow_records_terminal_event() {
        let runtime = LocalRuntime::new(ActivityRegistry::new());
        runtime.start_workflow("wf-1", json!({}));
        runtime.finish_workflow("wf-1", Ok(json!({"status": "PASSED"})));

        let journal = runtime.journal("wf-1");
        assert!(journal.last().unwrap().is_terminal());
    }
}
