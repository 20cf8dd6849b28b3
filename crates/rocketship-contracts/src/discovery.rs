// Discovery DTO for client version/feature negotiation

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Capabilities advertised by a running engine
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Discovery {
    pub capabilities: Vec<String>,
    pub version: String,
    /// Whether requests must carry a bearer token
    pub auth_required: bool,
}

impl Discovery {
    /// Capability set of the current engine generation
    pub fn current(version: impl Into<String>, auth_required: bool) -> Self {
        Self {
            capabilities: vec![
                "discovery.v2".to_string(),
                "runs.v1".to_string(),
                "streaming.v1".to_string(),
            ],
            version: version.into(),
            auth_required,
        }
    }
}
