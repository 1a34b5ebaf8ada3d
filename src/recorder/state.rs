use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecorderStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl RecorderStatus {
    /// True while a session exists and may still receive items.
    pub fn has_session(&self) -> bool {
        matches!(self, RecorderStatus::Running | RecorderStatus::Stopping)
    }
}

/// Point-in-time view of the recorder, safe to hand to a UI or serialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecorderState {
    pub enabled: bool,
    pub status: RecorderStatus,
    pub session_id: Option<String>,
    pub folder: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub elapsed_seconds: f64,
}
