use serde::{Deserialize, Serialize};

use crate::metrics::ResourceStatus;

use super::Symbol;

/// One entry of a session log. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogItem {
    /// Seconds since session start, taken when the item was built.
    pub relative_time_seconds: f64,
    #[serde(rename = "type")]
    pub kind: Symbol,
    pub title: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub asset_ref: String,
    #[serde(default)]
    pub status: String,
}

impl LogItem {
    pub fn new(kind: Symbol, title: impl Into<String>, relative_time_seconds: f64) -> Self {
        Self {
            relative_time_seconds,
            kind,
            title: title.into(),
            data: String::new(),
            asset_ref: String::new(),
            status: String::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Path of the bundled file this item refers to, relative to the bundle root.
    pub fn with_asset(mut self, asset_ref: impl Into<String>) -> Self {
        self.asset_ref = asset_ref.into();
        self
    }

    pub fn with_status(mut self, status: &ResourceStatus) -> Self {
        self.status = status.to_status_string();
        self
    }

    pub fn has_status(&self) -> bool {
        !self.status.is_empty()
    }
}
