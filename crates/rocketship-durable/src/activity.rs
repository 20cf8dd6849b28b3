//! Activity registration and the error envelope crossing the activity
//! boundary

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Failure taxonomy for activity errors
///
/// Every failure crossing the activity boundary is classified into one of
/// these kinds. Retry decisions key off the kind: only `Transient` and
/// `Timeout` are eligible for another attempt, and even those stay
/// subject to the step's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying under the step's policy
    Transient,

    /// Never retried
    Permanent,

    /// Declarative checks failed; details carry request/response snapshots
    AssertionFailed,

    /// The owning workflow was canceled
    Canceled,

    /// The attempt exceeded its start-to-close timeout
    Timeout,
}

impl FailureKind {
    /// Wire name, also matched against `retry.non_retryable_errors`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::AssertionFailed => "assertion_failed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this kind is eligible for retry at all
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for activity failures
///
/// The kind drives retry and cancellation handling; the optional details
/// payload is surfaced alongside the failure (assertion failures attach
/// their request/response snapshots here so the persisted record can
/// still render them).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    pub kind: FailureKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    fn of_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// A retryable failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::of_kind(FailureKind::Transient, message)
    }

    /// A failure no retry can fix
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::of_kind(FailureKind::Permanent, message)
    }

    /// A cancellation error
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::of_kind(FailureKind::Canceled, message)
    }

    /// A timeout; retried only when the step's policy allows
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::of_kind(FailureKind::Timeout, message)
    }

    /// Attach a details payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the kind permits another attempt
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ActivityError {}

/// Context provided to activities during execution
///
/// Carries attempt information and the cancellation token the runtime
/// trips when the owning workflow is canceled.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Workflow that scheduled this activity
    pub workflow_id: String,

    /// Activity identifier within the workflow
    pub activity_id: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(
        workflow_id: impl Into<String>,
        activity_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            attempt,
            max_attempts,
            cancellation,
        }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested; for select! patterns
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Whether this is the final attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Boxed future returned by activity functions
pub type ActivityFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ActivityError>> + Send>>;

/// Type-erased activity function
pub type ActivityFn = Arc<dyn Fn(ActivityContext, serde_json::Value) -> ActivityFuture + Send + Sync>;

/// Registry of activity functions
///
/// Activities are data: a name mapped to an async function taking a JSON
/// input and returning a JSON result. No base class, no inheritance.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, ActivityFn>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity function under a name
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(ActivityContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send + 'static,
    {
        let wrapped: ActivityFn = Arc::new(move |ctx, input| Box::pin(f(ctx, input)));
        self.activities.insert(name.into(), wrapped);
    }

    pub fn get(&self, name: &str) -> Option<&ActivityFn> {
        self.activities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Registered activity names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.activities.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names_and_retryability() {
        assert_eq!(FailureKind::Transient.as_str(), "transient");
        assert_eq!(FailureKind::AssertionFailed.as_str(), "assertion_failed");

        assert!(FailureKind::Transient.retryable());
        assert!(FailureKind::Timeout.retryable());
        assert!(!FailureKind::Permanent.retryable());
        assert!(!FailureKind::AssertionFailed.retryable());
        assert!(!FailureKind::Canceled.retryable());
    }

    #[test]
    fn test_error_constructors() {
        let error = ActivityError::transient("connection reset");
        assert_eq!(error.kind, FailureKind::Transient);
        assert!(error.retryable());
        assert_eq!(error.to_string(), "[transient] connection reset");

        let error = ActivityError::canceled("run canceled");
        assert_eq!(error.kind, FailureKind::Canceled);
        assert!(!error.retryable());

        let error = ActivityError::timeout("took too long");
        assert_eq!(error.kind, FailureKind::Timeout);
        assert!(error.retryable());
    }

    #[test]
    fn test_error_serialization() {
        let error = ActivityError::permanent("bad input")
            .with_details(json!({"field": "url"}));

        let encoded = serde_json::to_string(&error).unwrap();
        assert!(encoded.contains("\"kind\":\"permanent\""));

        let parsed: ActivityError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(error, parsed);
    }

    #[test]
    fn test_activity_context_last_attempt() {
        let token = CancellationToken::new();
        let ctx = ActivityContext::new("wf-1", "step-0", 3, 3, token.clone());
        assert!(ctx.is_last_attempt());
        assert!(!ctx.is_cancelled());

        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ActivityRegistry::new();
        registry.register("double", |_ctx, input: serde_json::Value| async move {
            let n = input.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!({ "n": n * 2 }))
        });

        assert!(registry.contains("double"));
        assert!(!registry.contains("triple"));

        let f = registry.get("double").unwrap();
        let ctx = ActivityContext::new("wf-1", "a-0", 1, 1, CancellationToken::new());
        let out = f(ctx, json!({ "n": 21 })).await.unwrap();
        assert_eq!(out, json!({ "n": 42 }));
    }
}
