use serde::{Deserialize, Serialize};

/// Point-in-time resource usage of the host process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

impl ResourceStatus {
    /// Compact JSON form stored in `LogItem::status`.
    pub fn to_status_string(&self) -> String {
        // Two plain numbers cannot fail to serialize; fall back to empty anyway.
        serde_json::to_string(self).unwrap_or_default()
    }
}
