//! In-process recorder for augmented-reality application runs.
//!
//! A [`SessionRecorder`] sits between the AR engine and the host app, logs
//! poses, anchors, scene and map snapshots, frame rate, test assertions and
//! free-form messages, and writes everything to one bundle directory per
//! session.

mod utils;

pub mod bundle;
pub mod capture;
pub mod clock;
pub mod evaluator;
pub mod metrics;
pub mod models;
pub mod recorder;
pub mod sampling;
pub mod settings;
pub mod spatial;

pub use bundle::{BundleLayout, BundleUploader};
pub use capture::{CaptureSink, CaptureSummary, LogNotifier, Notifier, ScreenCapture};
pub use clock::{Clock, ManualClock, SystemClock};
pub use evaluator::TestTrigger;
pub use models::{AppIdentity, Level, LogItem, LogSession, Symbol};
pub use recorder::{
    BundleSummary, Frame, FrameObserver, ObservedSource, RecorderConfig, RecorderState,
    RecorderStatus, SessionRecorder,
};
pub use settings::{RecorderSettings, SettingsStore};

/// Initializes `env_logger` (reads `RUST_LOG`, defaults to `info`).
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
