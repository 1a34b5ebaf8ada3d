//! On-disk bundle layout and retention.
//!
//! ```text
//! <root>/<sessionFolderName>/
//!   session.json
//!   screen.mp4
//!   scenes/<timestamp>.json
//!   maps/<timestamp>.json
//! ```
//!
//! Folder names are derived from the UTC start time so that lexicographic
//! order is chronological order; retention relies on that.

pub mod upload;
pub mod writer;

pub use upload::BundleUploader;
pub use writer::{SnapshotWriter, WriteFailure};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::models::LogSession;

pub const SESSION_FILE: &str = "session.json";
pub const VIDEO_FILE: &str = "screen.mp4";
pub const SCENES_DIR: &str = "scenes";
pub const MAPS_DIR: &str = "maps";

const FOLDER_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// What retention did before a new session folder was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub existing: usize,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Paths and filesystem operations for the bundle root.
#[derive(Debug, Clone)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_name(started_at: DateTime<Utc>) -> String {
        started_at.format(FOLDER_FORMAT).to_string()
    }

    pub fn session_dir(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    pub fn session_file(dir: &Path) -> PathBuf {
        dir.join(SESSION_FILE)
    }

    pub fn video_file(dir: &Path) -> PathBuf {
        dir.join(VIDEO_FILE)
    }

    pub fn scenes_dir(dir: &Path) -> PathBuf {
        dir.join(SCENES_DIR)
    }

    pub fn maps_dir(dir: &Path) -> PathBuf {
        dir.join(MAPS_DIR)
    }

    /// Session folders currently under the root, oldest first.
    pub fn list_sessions(&self) -> io::Result<Vec<String>> {
        let mut folders = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                folders.push(name.to_string());
            }
        }
        folders.sort();
        Ok(folders)
    }

    /// Deletes the oldest session folders so that, once the next one is
    /// created, at most `max_saved_sessions` remain.
    ///
    /// Only a failure to create or list the root is returned as an error;
    /// individual deletion failures are logged and reported.
    pub fn enforce_retention(&self, max_saved_sessions: usize) -> io::Result<RetentionReport> {
        fs::create_dir_all(&self.root)?;
        let folders = self.list_sessions()?;

        let mut report = RetentionReport {
            existing: folders.len(),
            ..RetentionReport::default()
        };

        if max_saved_sessions == 0 || folders.len() < max_saved_sessions {
            return Ok(report);
        }

        let excess = folders.len() - (max_saved_sessions - 1);
        for folder in folders.into_iter().take(excess) {
            let path = self.session_dir(&folder);
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed old session bundle {}", path.display());
                    report.removed.push(folder);
                }
                Err(err) => {
                    warn!("Failed to remove old session bundle {}: {err}", path.display());
                    report.failed.push(folder);
                }
            }
        }

        Ok(report)
    }

    /// Creates `<root>/<folder>` with its snapshot subdirectories. If the folder
    /// already exists a numeric suffix is appended.
    pub fn create_session_dir(&self, folder: &str) -> Result<(String, PathBuf)> {
        let mut name = folder.to_string();
        let mut suffix = 0;
        let dir = loop {
            let candidate = self.session_dir(&name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && candidate.is_dir() => {
                    suffix += 1;
                    name = format!("{folder}-{suffix}");
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to create session directory {}", candidate.display())
                    })
                }
            }
        };

        for sub in [Self::scenes_dir(&dir), Self::maps_dir(&dir)] {
            fs::create_dir_all(&sub)
                .with_context(|| format!("failed to create {}", sub.display()))?;
        }

        Ok((name, dir))
    }

    pub fn write_session(dir: &Path, session: &LogSession) -> Result<PathBuf> {
        let path = Self::session_file(dir);
        let serialized = serde_json::to_string_pretty(session)
            .with_context(|| format!("failed to encode session {}", session.id))?;
        fs::write(&path, serialized)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_session(dir: &Path) -> Result<LogSession> {
        let path = Self::session_file(dir);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }
}
