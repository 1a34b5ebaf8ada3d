use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::models::SamplingIntervals;

/// Everything a host can tune before calling `start()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// Master switch. When off every recorder call is a no-op.
    pub enabled: bool,
    /// Bundles kept on disk, the new one included. `0` keeps everything.
    pub max_saved_sessions: usize,
    pub auto_log_scene: bool,
    /// Log the scene graph on every interval even when its node count is unchanged.
    pub continuously_log_scene: bool,
    pub auto_log_map: bool,
    pub auto_log_planes: bool,
    pub auto_log_faces: bool,
    pub auto_log_anchors: bool,
    pub log_frame_rate: bool,
    /// Seconds between camera pose items; `0` disables the stream.
    pub camera_interval: f64,
    pub scene_interval: f64,
    pub map_interval: f64,
    /// Where finished bundles are uploaded. Empty means no upload.
    pub upload_destination: String,
    /// Pause between finishing the capture file and releasing the capture object.
    pub capture_grace_ms: u64,
    /// Only textures under this directory are copied into scene snapshots.
    pub scene_asset_root: Option<PathBuf>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_saved_sessions: 10,
            auto_log_scene: true,
            continuously_log_scene: false,
            auto_log_map: true,
            auto_log_planes: true,
            auto_log_faces: true,
            auto_log_anchors: true,
            log_frame_rate: true,
            camera_interval: 1.0,
            scene_interval: 1.0,
            map_interval: 5.0,
            upload_destination: String::new(),
            capture_grace_ms: 250,
            scene_asset_root: None,
        }
    }
}

fn sanitize_interval(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

impl RecorderSettings {
    /// Copy with negative or non-finite intervals clamped to `0` (disabled).
    pub fn sanitized(&self) -> Self {
        Self {
            camera_interval: sanitize_interval(self.camera_interval),
            scene_interval: sanitize_interval(self.scene_interval),
            map_interval: sanitize_interval(self.map_interval),
            ..self.clone()
        }
    }

    pub fn intervals(&self) -> SamplingIntervals {
        SamplingIntervals {
            camera: self.camera_interval,
            scene: self.scene_interval,
            map: self.map_interval,
        }
    }

    pub fn upload_enabled(&self) -> bool {
        !self.upload_destination.trim().is_empty()
    }
}

/// Settings persisted as JSON next to the bundles.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<RecorderSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed recorder settings at {}: {err}",
                    path.display()
                );
                RecorderSettings::default()
            })
        } else {
            RecorderSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> RecorderSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: RecorderSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &RecorderSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: RecorderSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let settings: RecorderSettings =
            serde_json::from_str(r#"{"maxSavedSessions":4,"autoLogMap":false}"#).unwrap();
        assert_eq!(settings.max_saved_sessions, 4);
        assert!(!settings.auto_log_map);
        assert!(settings.enabled);
        assert_eq!(settings.camera_interval, 1.0);
    }

    #[test]
    fn sanitize_disables_bad_intervals() {
        let settings = RecorderSettings {
            camera_interval: -1.0,
            scene_interval: f64::NAN,
            map_interval: 2.0,
            ..RecorderSettings::default()
        }
        .sanitized();
        assert_eq!(settings.camera_interval, 0.0);
        assert_eq!(settings.scene_interval, 0.0);
        assert_eq!(settings.map_interval, 2.0);
    }

    #[test]
    fn upload_needs_destination() {
        let mut settings = RecorderSettings::default();
        assert!(!settings.upload_enabled());
        settings.upload_destination = "  ".into();
        assert!(!settings.upload_enabled());
        settings.upload_destination = "bucket/sessions".into();
        assert!(settings.upload_enabled());
    }

    #[test]
    fn store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.settings(), RecorderSettings::default());

        let updated = RecorderSettings {
            max_saved_sessions: 3,
            continuously_log_scene: true,
            ..RecorderSettings::default()
        };
        store.update(updated.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.settings(), updated);
        reopened.reload().unwrap();
        assert_eq!(reopened.settings(), updated);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.settings(), RecorderSettings::default());
        assert!(store.reload().is_err());
    }
}
