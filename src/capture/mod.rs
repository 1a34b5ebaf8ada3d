//! Screen capture plumbing.
//!
//! Encoding is someone else's job: the host's capture subsystem hands us
//! already-encoded samples on its own thread and we append them to
//! `screen.mp4`. The sink remembers when the first sample arrived, which is
//! the true start of the video independent of session start.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// External screen recorder. `start` receives the sink to feed; `stop` must
/// stop producing samples before it returns.
pub trait ScreenCapture: Send {
    fn start(&mut self, sink: CaptureSink) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// User-visible alert channel for failures the user should know about.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Default notifier: the alert goes to the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::warn!("[alert] {title}: {message}");
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSummary {
    pub samples: u64,
    pub bytes: u64,
    pub first_pts: Option<Duration>,
    /// Session time at which the first sample arrived, in seconds.
    pub first_sample_offset: Option<f64>,
    pub failed: bool,
}

struct SinkState {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    summary: CaptureSummary,
}

/// Append-only handle onto `screen.mp4`. Cheap to clone; every clone feeds
/// the same file.
#[derive(Clone)]
pub struct CaptureSink {
    state: Arc<Mutex<SinkState>>,
    capturing: CancellationToken,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    origin: Duration,
}

impl CaptureSink {
    /// Opens `path` for writing. `origin` is the clock reading at session start.
    pub fn create(
        path: &Path,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        origin: Duration,
    ) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create capture file {}", path.display()))?;

        Ok(Self {
            state: Arc::new(Mutex::new(SinkState {
                writer: Some(BufWriter::new(file)),
                path: path.to_path_buf(),
                summary: CaptureSummary::default(),
            })),
            capturing: CancellationToken::new(),
            notifier,
            clock,
            origin,
        })
    }

    pub fn is_capturing(&self) -> bool {
        !self.capturing.is_cancelled()
    }

    /// Appends one encoded sample. Returns `false` once capturing has stopped
    /// or after a write error.
    pub fn append(&self, bytes: &[u8], pts: Duration) -> bool {
        if !self.is_capturing() {
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = state.writer.as_mut() else {
            return false;
        };

        if let Err(err) = writer.write_all(bytes) {
            let path = state.path.display().to_string();
            state.summary.failed = true;
            drop(state);
            self.fail(&format!("writing a sample to {path} failed: {err}"));
            return false;
        }

        let summary = &mut state.summary;
        if summary.samples == 0 {
            let offset = self.clock.now().saturating_sub(self.origin).as_secs_f64();
            summary.first_pts = Some(pts);
            summary.first_sample_offset = Some(offset);
            log_info!("First screen sample received {offset:.3}s into the session");
        }
        summary.samples += 1;
        summary.bytes += bytes.len() as u64;
        true
    }

    /// Reports a capture failure: logs it, alerts the user and stops accepting
    /// samples.
    pub fn fail(&self, message: &str) {
        log_error!("Screen capture failed: {message}");
        self.notifier.notify("Screen recording failed", message);
        self.capturing.cancel();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary
            .failed = true;
    }

    /// Stops accepting samples, flushes and closes the file.
    pub fn finish(&self) -> CaptureSummary {
        self.capturing.cancel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = state.writer.take() {
            if let Err(err) = writer.flush() {
                log_warn!("Failed to flush {}: {err}", state.path.display());
                state.summary.failed = true;
                self.notifier
                    .notify("Screen recording failed", &format!("flush failed: {err}"));
            }
        }
        state.summary.clone()
    }

    pub fn summary(&self) -> CaptureSummary {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary
            .clone()
    }
}
