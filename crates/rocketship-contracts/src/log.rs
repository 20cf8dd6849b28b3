// Log entry DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One append-only log line attached to a run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogEntry {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub test_name: Option<String>,
    pub step_name: Option<String>,
    pub message: String,
    pub color: Option<String>,
    #[serde(default)]
    pub bold: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_bold_defaults_false() {
        let json = r#"{
            "run_id": "0191f3a0-0000-7000-8000-000000000000",
            "workflow_id": "wf-1",
            "test_name": null,
            "step_name": null,
            "message": "hello",
            "color": null,
            "timestamp": "2025-01-01T00:00:00Z"
        }"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.bold);
        assert_eq!(entry.message, "hello");
    }
}
