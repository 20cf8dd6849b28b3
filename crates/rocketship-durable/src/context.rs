//! The workflow capability surface
//!
//! Workflow code never touches the wall clock, thread sleeps, or plugin
//! internals directly. Everything that crosses the boundary to the outside
//! world goes through this trait, which keeps the interpreter
//! replay-deterministic and lets tests substitute a scripted runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;
use crate::retry::RetryPolicy;

/// Default start-to-close timeout for activities (30 minutes)
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Options for one activity dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy for this activity
    pub retry_policy: RetryPolicy,

    /// Maximum time for one execution attempt
    #[serde(with = "duration_serde")]
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::single_attempt(),
            start_to_close_timeout: DEFAULT_ACTIVITY_TIMEOUT,
        }
    }
}

impl ActivityOptions {
    /// Set the retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the start-to-close timeout
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }
}

/// Capability handle held by running workflow code
///
/// The only legal suspension points inside a workflow are the async
/// methods here. A disconnected context survives cancellation of its
/// parent, which is what lets cleanup phases run to completion after a
/// cancel or timeout.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Identifier of the owning workflow execution
    fn workflow_id(&self) -> &str;

    /// Substrate clock; never read the wall clock directly
    fn now(&self) -> DateTime<Utc>;

    /// Whether cancellation has been requested for this context
    fn is_cancelled(&self) -> bool;

    /// Dispatch an activity and await its result
    ///
    /// The runtime enforces the timeout and retry policy in `options`;
    /// the error returned after exhausted retries carries the substrate's
    /// retry-state wrapping (see [`RETRY_WRAP_MARKER`](crate::RETRY_WRAP_MARKER)).
    async fn execute_activity(
        &self,
        activity_type: &str,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Result<serde_json::Value, ActivityError>;

    /// Durable sleep; cancellation interrupts it with a canceled error
    async fn sleep(&self, duration: Duration) -> Result<(), ActivityError>;

    /// A context that ignores cancellation of this one
    ///
    /// Cleanup phases run on a disconnected context so they complete even
    /// when the test was canceled or timed out.
    fn new_disconnected(&self) -> Arc<dyn WorkflowContext>;
}

/// Serde support for Duration (as milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
