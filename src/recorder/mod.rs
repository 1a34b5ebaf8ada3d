//! Session lifecycle: `idle -> starting -> running -> stopping -> idle`.
//!
//! The [`SessionRecorder`] owns the live [`crate::models::LogSession`], the
//! sampling engine and the test queue. Engine callbacks reach it through a
//! [`RecordingObserver`] interposed on the host's [`ObservedSource`] for the
//! length of a session.

mod controller;
mod observer;
mod state;

pub use controller::{BundleSummary, RecorderConfig, SessionRecorder};
pub use observer::{Frame, FrameObserver, ObservedSource, RecordingObserver};
pub use state::{RecorderState, RecorderStatus};
