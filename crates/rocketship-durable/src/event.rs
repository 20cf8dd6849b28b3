//! Workflow journal events
//!
//! The append-only log kept per workflow execution. Events are immutable
//! once written; a replayed execution must produce the same sequence of
//! decisions the journal records.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

/// Events recorded in a workflow's journal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow was started with the given input
    WorkflowStarted { input: serde_json::Value },

    /// Workflow completed successfully
    WorkflowCompleted { result: serde_json::Value },

    /// Workflow failed
    WorkflowFailed { error: ActivityError },

    /// Workflow was canceled
    WorkflowCancelled { reason: String },

    /// Activity was scheduled for execution
    ActivityScheduled {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
    },

    /// One execution attempt started
    ActivityStarted { activity_id: String, attempt: u32 },

    /// Activity completed successfully
    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },

    /// Activity attempt failed; `will_retry` says whether another attempt
    /// follows
    ActivityFailed {
        activity_id: String,
        error: ActivityError,
        will_retry: bool,
    },

    /// Activity attempt exceeded its start-to-close timeout
    ActivityTimedOut { activity_id: String, attempt: u32 },

    /// Activity was canceled
    ActivityCancelled { activity_id: String, reason: String },

    /// Timer was started
    TimerStarted { timer_id: String, duration_ms: u64 },

    /// Timer fired
    TimerFired { timer_id: String },

    /// Timer was canceled before firing
    TimerCancelled { timer_id: String },
}

impl WorkflowEvent {
    /// The activity_id if this is an activity-related event
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. }
            | Self::ActivityTimedOut { activity_id, .. }
            | Self::ActivityCancelled { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }

    /// Whether this is a terminal workflow event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::ActivityCompleted {
            activity_id: "step-0".to_string(),
            result: json!({"status": "ok"}),
        };

        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("\"type\":\"activity_completed\""));

        let parsed: WorkflowEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_activity_id_extraction() {
        let event = WorkflowEvent::ActivityStarted {
            activity_id: "step-2".to_string(),
            attempt: 1,
        };
        assert_eq!(event.activity_id(), Some("step-2"));

        let event = WorkflowEvent::TimerFired {
            timer_id: "delay-0".to_string(),
        };
        assert_eq!(event.activity_id(), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(WorkflowEvent::WorkflowCompleted { result: json!({}) }.is_terminal());
        assert!(WorkflowEvent::WorkflowCancelled {
            reason: "operator".to_string()
        }
        .is_terminal());
        assert!(!WorkflowEvent::WorkflowStarted { input: json!({}) }.is_terminal());
    }
}
