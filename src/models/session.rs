//! Session metadata and the ordered item log that becomes `session.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sysinfo::System;

use super::LogItem;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentity {
    pub name: String,
    pub version: String,
    pub bundle_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub model: String,
    pub system_name: String,
    pub system_version: String,
    pub host_name: String,
}

impl DeviceInfo {
    /// Describes the machine the recorder is running on.
    pub fn current() -> Self {
        Self {
            model: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            system_name: System::name().unwrap_or_default(),
            system_version: System::os_version().unwrap_or_default(),
            host_name: System::host_name().unwrap_or_default(),
        }
    }
}

/// Auto-logging intervals in effect for a session, in seconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingIntervals {
    pub camera: f64,
    pub scene: f64,
    pub map: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub file: String,
    /// Offset of the first captured sample from session start, in seconds.
    pub first_sample_offset: Option<f64>,
    pub sample_count: u64,
    pub byte_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub description: String,
    /// `None` for end-of-session cases.
    pub trigger_time: Option<f64>,
    pub executed: bool,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogSession {
    pub id: String,
    pub name: String,
    pub folder: String,
    pub app: AppIdentity,
    pub device: DeviceInfo,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub intervals: SamplingIntervals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub video: Option<VideoInfo>,
    #[serde(default)]
    pub tests: Vec<TestOutcome>,
    items: Vec<LogItem>,
}

impl LogSession {
    pub fn new(
        id: String,
        name: String,
        folder: String,
        app: AppIdentity,
        device: DeviceInfo,
        start_time: DateTime<Utc>,
        intervals: SamplingIntervals,
    ) -> Self {
        Self {
            id,
            name,
            folder,
            app,
            device,
            start_time,
            end_time: None,
            intervals,
            user: None,
            location: None,
            metadata: BTreeMap::new(),
            video: None,
            tests: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Appends an item. Items are never reordered, so callers must build them
    /// with a timestamp no earlier than the last one.
    pub fn append(&mut self, item: LogItem) {
        debug_assert!(
            self.items
                .last()
                .map_or(true, |last| last.relative_time_seconds <= item.relative_time_seconds),
            "log items must be appended in time order"
        );
        self.items.push(item);
    }

    pub fn items(&self) -> &[LogItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn last_time(&self) -> f64 {
        self.items
            .last()
            .map_or(0.0, |item| item.relative_time_seconds)
    }

    /// Same metadata, no items. Collects appends while the real log is out
    /// on loan.
    pub(crate) fn detached(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            folder: self.folder.clone(),
            app: self.app.clone(),
            device: self.device.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            intervals: self.intervals,
            user: self.user.clone(),
            location: self.location,
            metadata: self.metadata.clone(),
            video: self.video.clone(),
            tests: self.tests.clone(),
            items: Vec::new(),
        }
    }

    /// Moves `other`'s items onto the end of this log, clamping their times so
    /// the order still holds.
    pub(crate) fn absorb(&mut self, other: &mut LogSession) {
        for mut item in other.items.drain(..) {
            item.relative_time_seconds = item.relative_time_seconds.max(self.last_time());
            self.items.push(item);
        }
    }
}
