use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Kind of a log item. The serde names are the wire strings written to
/// `session.json` and must never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Symbol {
    Info,
    Debug,
    Warning,
    Error,
    Severe,
    Data,
    Capture,
    Map,
    Scene,
    Touch,
    Plane,
    PlaneUpdate,
    Image,
    Object,
    Face,
    Anchor,
    AnchorUpdate,
    Fps,
    Cam,
    Yshift,
    Passed,
    Failed,
}

impl Symbol {
    pub const ALL: [Symbol; 22] = [
        Symbol::Info,
        Symbol::Debug,
        Symbol::Warning,
        Symbol::Error,
        Symbol::Severe,
        Symbol::Data,
        Symbol::Capture,
        Symbol::Map,
        Symbol::Scene,
        Symbol::Touch,
        Symbol::Plane,
        Symbol::PlaneUpdate,
        Symbol::Image,
        Symbol::Object,
        Symbol::Face,
        Symbol::Anchor,
        Symbol::AnchorUpdate,
        Symbol::Fps,
        Symbol::Cam,
        Symbol::Yshift,
        Symbol::Passed,
        Symbol::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Info => "info",
            Symbol::Debug => "debug",
            Symbol::Warning => "warning",
            Symbol::Error => "error",
            Symbol::Severe => "severe",
            Symbol::Data => "data",
            Symbol::Capture => "capture",
            Symbol::Map => "map",
            Symbol::Scene => "scene",
            Symbol::Touch => "touch",
            Symbol::Plane => "plane",
            Symbol::PlaneUpdate => "planeUpdate",
            Symbol::Image => "image",
            Symbol::Object => "object",
            Symbol::Face => "face",
            Symbol::Anchor => "anchor",
            Symbol::AnchorUpdate => "anchorUpdate",
            Symbol::Fps => "fps",
            Symbol::Cam => "cam",
            Symbol::Yshift => "yshift",
            Symbol::Passed => "passed",
            Symbol::Failed => "failed",
        }
    }

    /// True for the five severity symbols produced by the text API.
    #[cfg(test)]
    pub(crate) fn is_level(&self) -> bool {
        matches!(
            self,
            Symbol::Info | Symbol::Debug | Symbol::Warning | Symbol::Error | Symbol::Severe
        )
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symbol {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Symbol::ALL
            .iter()
            .copied()
            .find(|symbol| symbol.as_str() == value)
            .ok_or_else(|| anyhow!("unknown log symbol '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    #[default]
    Info,
    Debug,
    Warning,
    Error,
    Severe,
}

impl Level {
    /// Level used when mirroring a session message into the process log.
    pub fn log_level(&self) -> log::Level {
        match self {
            Level::Info => log::Level::Info,
            Level::Debug => log::Level::Debug,
            Level::Warning => log::Level::Warn,
            Level::Error | Level::Severe => log::Level::Error,
        }
    }
}

impl From<Level> for Symbol {
    fn from(level: Level) -> Self {
        match level {
            Level::Info => Symbol::Info,
            Level::Debug => Symbol::Debug,
            Level::Warning => Symbol::Warning,
            Level::Error => Symbol::Error,
            Level::Severe => Symbol::Severe,
        }
    }
}
