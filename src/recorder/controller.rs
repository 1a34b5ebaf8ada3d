use std::{
    convert::identity,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    bundle::{
        upload::spawn_upload, BundleLayout, BundleUploader, SnapshotWriter, MAPS_DIR, SCENES_DIR,
        VIDEO_FILE,
    },
    capture::{CaptureSink, CaptureSummary, LogNotifier, Notifier, ScreenCapture},
    clock::{Clock, SystemClock},
    evaluator::{ArTestCase, Predicate, TestQueue, TestResult, TestTrigger},
    metrics::StatusSampler,
    models::{AppIdentity, DeviceInfo, Level, LogItem, LogSession, Symbol, VideoInfo},
    sampling::SamplingEngine,
    settings::RecorderSettings,
    spatial::{
        encode_anchor, snapshot_file_name, translation, Anchor, SceneGraph, SpaceMap,
        TrackingState,
    },
};

use super::{
    observer::{ForwardSlot, Frame, ObservedSource, RecordingObserver},
    RecorderState, RecorderStatus,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything the recorder needs to know up front.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory holding one folder per recorded session.
    pub root: PathBuf,
    pub app: AppIdentity,
    pub settings: RecorderSettings,
}

/// What `stop()` reports about the bundle it just closed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub id: String,
    pub folder: String,
    pub path: PathBuf,
    pub item_count: usize,
    /// `session.json` was written successfully.
    pub persisted: bool,
    pub upload_requested: bool,
}

struct ActiveSession {
    log: LogSession,
    dir: PathBuf,
    origin: Duration,
    engine: SamplingEngine,
    tests: TestQueue,
    writer: SnapshotWriter,
    sink: Option<CaptureSink>,
    capture: Option<Box<dyn ScreenCapture>>,
    source: Option<Arc<dyn ObservedSource>>,
    forward: ForwardSlot,
}

impl ActiveSession {
    /// Session time for the next item. Never earlier than the last item, so
    /// the log stays ordered even when callers race.
    fn stamp(&self, clock: &dyn Clock) -> f64 {
        self.elapsed(clock).max(self.log.last_time())
    }

    fn elapsed(&self, clock: &dyn Clock) -> f64 {
        clock.now().saturating_sub(self.origin).as_secs_f64()
    }

    fn record(
        &mut self,
        clock: &dyn Clock,
        kind: Symbol,
        title: impl Into<String>,
        build: impl FnOnce(LogItem) -> LogItem,
    ) {
        let at = self.stamp(clock);
        self.record_at(at, kind, title, build);
    }

    /// Appends at a time taken earlier with [`ActiveSession::stamp`].
    fn record_at(
        &mut self,
        at: f64,
        kind: Symbol,
        title: impl Into<String>,
        build: impl FnOnce(LogItem) -> LogItem,
    ) {
        let item = build(LogItem::new(kind, title, at.max(self.log.last_time())));
        self.log.append(item);
    }

    fn record_test_results(&mut self, clock: &dyn Clock, results: Vec<TestResult>) {
        for result in results {
            let kind = if result.passed {
                Symbol::Passed
            } else {
                Symbol::Failed
            };
            log_info!("Test '{}' {}", result.description, kind);
            self.record(clock, kind, result.description, identity);
        }
    }

    fn drain_writer_failures(&mut self, clock: &dyn Clock) {
        for failure in self.writer.drain_failures() {
            self.record(clock, Symbol::Error, "Snapshot write failed", |item| {
                item.with_data(failure.message).with_asset(failure.asset_ref)
            });
        }
    }
}

struct RecorderInner {
    settings: RecorderSettings,
    /// Set when the bundle root could not be listed; disables the recorder
    /// for the rest of the process.
    root_unavailable: bool,
    status: RecorderStatus,
    pending_tests: TestQueue,
    session: Option<ActiveSession>,
    capture: Option<Box<dyn ScreenCapture>>,
    uploader: Option<Arc<dyn BundleUploader>>,
    notifier: Arc<dyn Notifier>,
    uploads: Vec<JoinHandle<()>>,
}

impl RecorderInner {
    fn is_enabled(&self) -> bool {
        self.settings.enabled && !self.root_unavailable
    }

    /// The live session, if it may still receive items.
    fn live_session(&mut self) -> Option<&mut ActiveSession> {
        if !self.is_enabled() || !self.status.has_session() {
            return None;
        }
        self.session.as_mut()
    }

    /// The live session, only while frames are being recorded.
    fn running_session(&mut self) -> Option<&mut ActiveSession> {
        if self.status != RecorderStatus::Running {
            return None;
        }
        self.live_session()
    }
}

enum PrepareError {
    RootUnavailable(io::Error),
    Create(anyhow::Error),
}

/// Decisions taken under the lock for a frame; executed after releasing it.
struct SnapshotPlan {
    session_id: String,
    feature_points: usize,
    source: Arc<dyn ObservedSource>,
    scene: bool,
    map: bool,
}

/// Returns the recorder to idle if `start` is abandoned before the session is
/// installed, whether by an early return, a dropped future or a panic.
struct StartGuard<'a> {
    recorder: &'a SessionRecorder,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.recorder.lock();
        if inner.status == RecorderStatus::Starting {
            log_debug!("Start abandoned; recorder back to idle");
            inner.status = RecorderStatus::Idle;
        }
    }
}

/// Handle onto the recorder. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct SessionRecorder {
    inner: Arc<Mutex<RecorderInner>>,
    layout: BundleLayout,
    app: AppIdentity,
    clock: Arc<dyn Clock>,
    sampler: StatusSampler,
}

impl SessionRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: RecorderConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner {
                settings: config.settings,
                root_unavailable: false,
                status: RecorderStatus::Idle,
                pending_tests: TestQueue::new(),
                session: None,
                capture: None,
                uploader: None,
                notifier: Arc::new(LogNotifier),
                uploads: Vec::new(),
            })),
            layout: BundleLayout::new(config.root),
            app: config.app,
            clock,
            sampler: StatusSampler::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- configuration ---------------------------------------------------

    pub fn bundle_root(&self) -> &Path {
        self.layout.root()
    }

    pub fn settings(&self) -> RecorderSettings {
        self.lock().settings.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_enabled()
    }

    /// Replaces the settings. Only allowed between sessions.
    pub fn configure(&self, settings: RecorderSettings) -> Result<()> {
        let mut inner = self.lock();
        if inner.status != RecorderStatus::Idle {
            bail!("cannot change recorder settings while a session is {:?}", inner.status);
        }
        inner.settings = settings;
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.lock();
        if inner.status != RecorderStatus::Idle {
            bail!("cannot toggle the recorder while a session is {:?}", inner.status);
        }
        if enabled && inner.root_unavailable {
            log_warn!(
                "Recorder stays disabled: bundle root {} was unavailable",
                self.layout.root().display()
            );
        }
        inner.settings.enabled = enabled;
        Ok(())
    }

    /// Screen recorder started and stopped with each session.
    pub fn attach_capture(&self, capture: Box<dyn ScreenCapture>) -> Result<()> {
        let mut inner = self.lock();
        if inner.status != RecorderStatus::Idle {
            bail!("cannot attach a screen capture while a session is {:?}", inner.status);
        }
        inner.capture = Some(capture);
        Ok(())
    }

    pub fn set_uploader(&self, uploader: Arc<dyn BundleUploader>) {
        self.lock().uploader = Some(uploader);
    }

    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.lock().notifier = notifier;
    }

    pub fn state(&self) -> RecorderState {
        let inner = self.lock();
        let enabled = inner.is_enabled();
        match inner.session.as_ref() {
            Some(active) => RecorderState {
                enabled,
                status: inner.status,
                session_id: Some(active.log.id.clone()),
                folder: Some(active.log.folder.clone()),
                started_at: Some(active.log.start_time),
                item_count: active.log.item_count(),
                elapsed_seconds: active.elapsed(self.clock.as_ref()),
            },
            None => RecorderState {
                enabled,
                status: inner.status,
                ..RecorderState::default()
            },
        }
    }

    // ----- lifecycle -------------------------------------------------------

    /// Starts a session and, when `source` is given, interposes on its
    /// observer. Must run inside a Tokio runtime.
    pub async fn start(&self, source: Option<Arc<dyn ObservedSource>>, name: &str) -> Result<()> {
        let settings = {
            let mut inner = self.lock();
            if !inner.is_enabled() {
                log_warn!("Recorder is disabled; ignoring start");
                return Ok(());
            }
            if inner.status != RecorderStatus::Idle {
                log_warn!("Recorder is {:?}; ignoring start", inner.status);
                return Ok(());
            }
            inner.status = RecorderStatus::Starting;
            inner.settings.sanitized()
        };
        let mut guard = StartGuard {
            recorder: self,
            armed: true,
        };

        let started_at = self.clock.wall_time();
        let (folder, dir) = match self.prepare_bundle(&settings, started_at).await {
            Ok(prepared) => prepared,
            Err(PrepareError::RootUnavailable(err)) => {
                self.lock().root_unavailable = true;
                log_error!(
                    "Bundle root {} is unavailable, disabling the recorder: {err}",
                    self.layout.root().display()
                );
                return Err(anyhow!(err).context(format!(
                    "bundle root {} is unavailable",
                    self.layout.root().display()
                )));
            }
            Err(PrepareError::Create(err)) => {
                log_error!("Failed to create session bundle: {err:#}");
                return Err(err);
            }
        };

        let writer = SnapshotWriter::spawn(settings.scene_asset_root.clone())?;

        let (tests, mut capture, notifier) = {
            let mut inner = self.lock();
            (
                std::mem::take(&mut inner.pending_tests),
                inner.capture.take(),
                Arc::clone(&inner.notifier),
            )
        };

        let device = DeviceInfo::current();
        let origin = self.clock.now();
        let mut capture_error = None;
        let sink = match capture.as_mut() {
            Some(capture) => {
                match self.start_capture(capture.as_mut(), &dir, Arc::clone(&notifier), origin) {
                    Ok(sink) => Some(sink),
                    Err(err) => {
                        log_error!("Screen capture did not start: {err:#}");
                        notifier.notify("Screen recording failed", &format!("{err:#}"));
                        capture_error = Some(format!("{err:#}"));
                        None
                    }
                }
            }
            None => None,
        };

        let mut engine = SamplingEngine::new(&settings);
        engine.reset(0.0);

        let log = LogSession::new(
            Uuid::new_v4().to_string(),
            name.to_string(),
            folder.clone(),
            self.app.clone(),
            device,
            started_at,
            settings.intervals(),
        );
        let session_id = log.id.clone();

        let forward: ForwardSlot = Arc::new(Mutex::new(None));
        let mut active = ActiveSession {
            log,
            dir,
            origin,
            engine,
            tests,
            writer,
            sink,
            capture,
            source: source.clone(),
            forward: Arc::clone(&forward),
        };

        let status = self.sampler.sample();
        active.record(self.clock.as_ref(), Symbol::Info, "Recording started", |item| {
            item.with_status(&status)
        });
        if let Some(message) = capture_error {
            active.record(self.clock.as_ref(), Symbol::Error, "Screen capture failed", |item| {
                item.with_data(message)
            });
        }

        {
            let mut inner = self.lock();
            inner.session = Some(active);
            inner.status = RecorderStatus::Running;
        }
        guard.armed = false;

        if let Some(source) = source {
            let recording = RecordingObserver::new(Arc::clone(&forward), self.clone());
            let previous = source.replace_observer(Some(Box::new(recording)));
            *forward.lock().unwrap_or_else(PoisonError::into_inner) = previous;
        }

        log_info!("Recording session {session_id} into {folder}");
        Ok(())
    }

    async fn prepare_bundle(
        &self,
        settings: &RecorderSettings,
        started_at: DateTime<Utc>,
    ) -> Result<(String, PathBuf), PrepareError> {
        let layout = self.layout.clone();
        let max_saved = settings.max_saved_sessions;
        let folder = BundleLayout::folder_name(started_at);

        let prepared = tokio::task::spawn_blocking(move || {
            let report = layout
                .enforce_retention(max_saved)
                .map_err(PrepareError::RootUnavailable)?;
            if !report.removed.is_empty() || !report.failed.is_empty() {
                log_info!(
                    "Retention removed {} of {} bundles ({} could not be removed)",
                    report.removed.len(),
                    report.existing,
                    report.failed.len()
                );
            }
            layout.create_session_dir(&folder).map_err(PrepareError::Create)
        })
        .await;

        match prepared {
            Ok(result) => result,
            Err(join_err) => Err(PrepareError::Create(anyhow!(
                "bundle preparation task failed: {join_err}"
            ))),
        }
    }

    fn start_capture(
        &self,
        capture: &mut dyn ScreenCapture,
        dir: &Path,
        notifier: Arc<dyn Notifier>,
        origin: Duration,
    ) -> Result<CaptureSink> {
        let sink = CaptureSink::create(
            &BundleLayout::video_file(dir),
            notifier,
            Arc::clone(&self.clock),
            origin,
        )?;
        if let Err(err) = capture.start(sink.clone()) {
            sink.finish();
            return Err(err);
        }
        Ok(sink)
    }

    /// Ends the session, runs `finalizer` on the log before it is frozen and
    /// writes the bundle. Returns `None` when nothing was recording.
    ///
    /// Once polled, the shutdown runs on its own task and always completes,
    /// even if the caller stops waiting. The finalizer runs without the
    /// recorder lock, so it may log through the recorder; a panic in it is
    /// recorded as a `severe` item.
    pub async fn stop<F>(&self, finalizer: F) -> Option<BundleSummary>
    where
        F: FnOnce(&mut LogSession) + Send + 'static,
    {
        {
            let mut inner = self.lock();
            if inner.status != RecorderStatus::Running || inner.session.is_none() {
                log_debug!("Recorder is {:?}; nothing to stop", inner.status);
                return None;
            }
            inner.status = RecorderStatus::Stopping;
        }

        let recorder = self.clone();
        let shutdown = tokio::spawn(async move { recorder.finish_session(finalizer).await });
        match shutdown.await {
            Ok(Some(summary)) => Some(summary),
            Ok(None) => {
                self.abandon_session();
                None
            }
            Err(err) => {
                log_error!("Session shutdown failed: {err}");
                self.abandon_session();
                None
            }
        }
    }

    /// Runs `f` on the session being stopped.
    fn with_stopping<R>(&self, f: impl FnOnce(&mut ActiveSession) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.status != RecorderStatus::Stopping {
            return None;
        }
        inner.session.as_mut().map(f)
    }

    async fn finish_session<F>(&self, finalizer: F) -> Option<BundleSummary>
    where
        F: FnOnce(&mut LogSession),
    {
        let clock = self.clock.as_ref();
        let grace = Duration::from_millis(self.lock().settings.capture_grace_ms);
        let (source, forward) =
            self.with_stopping(|active| (active.source.take(), Arc::clone(&active.forward)))?;

        if let Some(source) = source {
            restore_observer(source.as_ref(), &forward);
        }

        let flushed = self.with_stopping(|active| {
            let results = active.tests.evaluate_remaining();
            active.record_test_results(clock, results);
            active.writer.flush()
        })?;
        if flushed.await.is_err() {
            log_warn!("Snapshot writer stopped before flushing");
        }

        // The finalizer gets the real log; items logged meanwhile land in a
        // stand-in and are merged back afterwards.
        let mut log = self.with_stopping(|active| {
            active.drain_writer_failures(clock);
            let stand_in = active.log.detached();
            std::mem::replace(&mut active.log, stand_in)
        })?;
        let finalized = catch_unwind(AssertUnwindSafe(|| finalizer(&mut log))).is_ok();

        let (capture, sink) = self.with_stopping(move |active| {
            log.absorb(&mut active.log);
            active.log = log;
            if !finalized {
                log_error!("Session finalizer panicked");
                active.record(clock, Symbol::Severe, "Session finalizer panicked", identity);
            }
            let status = self.sampler.sample();
            active.record(clock, Symbol::Info, "Recording stopped", |item| {
                item.with_status(&status)
            });
            (active.capture.take(), active.sink.take())
        })?;

        let capture = match capture {
            Some(mut capture) if sink.is_some() => {
                if let Err(err) = capture.stop() {
                    log_warn!("Screen capture did not stop cleanly: {err:#}");
                }
                Some(capture)
            }
            other => other,
        };
        let video = sink.map(|sink| video_info(sink.finish()));
        if video.is_some() && !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }

        let (mut active, upload) = {
            let mut inner = self.lock();
            if inner.status != RecorderStatus::Stopping {
                return None;
            }
            inner.capture = capture;
            let active = inner.session.take()?;
            let upload = inner
                .settings
                .upload_enabled()
                .then(|| inner.uploader.clone())
                .flatten()
                .map(|uploader| (uploader, inner.settings.upload_destination.clone()));
            (active, upload)
        };

        active.log.end_time = Some(self.clock.wall_time());
        active.log.video = video;
        active.log.tests = active.tests.outcomes();

        let id = active.log.id.clone();
        let folder = active.log.folder.clone();
        let item_count = active.log.item_count();
        let dir = active.dir.clone();

        let persisted = {
            let ActiveSession {
                log, dir, writer, ..
            } = active;
            tokio::task::spawn_blocking(move || {
                // Joins the writer thread; it has nothing queued after the flush.
                drop(writer);
                BundleLayout::write_session(&dir, &log)
            })
            .await
        };
        let persisted = match persisted {
            Ok(Ok(path)) => {
                log_info!("Session {id} saved to {}", path.display());
                true
            }
            Ok(Err(err)) => {
                log_error!("Failed to save session {id}: {err:#}");
                false
            }
            Err(join_err) => {
                log_error!("Session {id} save task failed: {join_err}");
                false
            }
        };

        let mut inner = self.lock();
        let upload_requested = match upload {
            Some((uploader, destination)) if persisted => {
                inner
                    .uploads
                    .push(spawn_upload(uploader, dir.clone(), destination));
                true
            }
            _ => false,
        };
        inner.status = RecorderStatus::Idle;

        Some(BundleSummary {
            id,
            folder,
            path: dir,
            item_count,
            persisted,
            upload_requested,
        })
    }

    /// Closes a session whose shutdown did not finish: puts the observer and
    /// capture back, saves what was logged and returns to idle.
    fn abandon_session(&self) {
        let active = {
            let mut inner = self.lock();
            if inner.status != RecorderStatus::Stopping {
                return;
            }
            inner.status = RecorderStatus::Idle;
            let Some(mut active) = inner.session.take() else {
                return;
            };
            if let Some(capture) = active.capture.take() {
                inner.capture = Some(capture);
            }
            active
        };

        let ActiveSession {
            mut log,
            dir,
            sink,
            source,
            forward,
            writer,
            ..
        } = active;
        if let Some(source) = source {
            restore_observer(source.as_ref(), &forward);
        }
        log.video = sink.map(|sink| video_info(sink.finish()));
        log.end_time = Some(self.clock.wall_time());
        drop(writer);
        match BundleLayout::write_session(&dir, &log) {
            Ok(path) => log_warn!("Session {} closed early, saved to {}", log.id, path.display()),
            Err(err) => log_error!("Session {} closed early and was not saved: {err:#}", log.id),
        }
    }

    /// Waits for every upload handed off by `stop()` so far.
    pub async fn wait_for_uploads(&self) {
        let pending = std::mem::take(&mut self.lock().uploads);
        for handle in pending {
            if let Err(err) = handle.await {
                log_warn!("Upload task failed: {err}");
            }
        }
    }

    // ----- engine callbacks ------------------------------------------------

    /// Per-frame tick. Runs on the engine thread.
    pub fn on_frame(&self, frame: &Frame) {
        let Some(plan) = self.tick(frame) else {
            return;
        };

        // The source is queried without holding the recorder lock.
        let graph = plan.scene.then(|| plan.source.scene_graph()).flatten();
        let map = plan.map.then(|| plan.source.space_map()).flatten();
        if graph.is_none() && map.is_none() {
            return;
        }

        let mut inner = self.lock();
        let Some(active) = inner
            .running_session()
            .filter(|active| active.log.id == plan.session_id)
        else {
            log_debug!("Dropping snapshots for a session that already ended");
            return;
        };

        if let Some(graph) = graph {
            let node_count = graph.node_count();
            if active.engine.accept_scene(node_count) {
                self.dispatch_scene(active, graph);
            }
        }
        if let Some(map) = map {
            active.engine.commit_map(plan.feature_points);
            self.dispatch_map(active, map);
        }
    }

    fn tick(&self, frame: &Frame) -> Option<SnapshotPlan> {
        let mut inner = self.lock();
        let active = inner.running_session()?;
        let clock = self.clock.as_ref();
        let now = active.elapsed(clock);

        active.drain_writer_failures(clock);

        if let Some(fps) = active.engine.tick_frame_rate(now) {
            let status = self.sampler.sample();
            active.record(clock, Symbol::Fps, "Frame rate", |item| {
                item.with_data(fps.to_string()).with_status(&status)
            });
        }

        if active.engine.poll_pose(now) {
            let data = json!({
                "transform": frame.pose.transform,
                "position": translation(&frame.pose.transform),
                "trackingState": frame.tracking_state.as_str(),
            });
            active.record(clock, Symbol::Cam, "Camera", |item| item.with_data(data.to_string()));
        }

        if active.engine.poll_tests(now) {
            let results = active.tests.evaluate_due(now);
            active.record_test_results(clock, results);
        }

        let scene = active.engine.scene_enabled() && active.engine.scene_due(now);
        let map = active.engine.map_enabled()
            && active.engine.map_due(now, frame.feature_point_count);
        if !scene && !map {
            return None;
        }

        let source = active.source.clone()?;
        Some(SnapshotPlan {
            session_id: active.log.id.clone(),
            feature_points: frame.feature_point_count,
            source,
            scene,
            map,
        })
    }

    // The item time and the snapshot file name share one stamp.
    fn dispatch_scene(&self, active: &mut ActiveSession, graph: SceneGraph) {
        let at = active.stamp(self.clock.as_ref());
        let file = snapshot_file_name(at, "json");
        let asset_ref = format!("{SCENES_DIR}/{file}");
        let path = BundleLayout::scenes_dir(&active.dir).join(&file);
        let data = json!({ "nodes": graph.node_count() }).to_string();

        match active.writer.write_scene(graph, path, asset_ref.clone()) {
            Ok(()) => active.record_at(at, Symbol::Scene, "Scene", |item| {
                item.with_data(data).with_asset(asset_ref)
            }),
            Err(err) => {
                log_error!("Could not queue scene snapshot: {err:#}");
                active.record_at(at, Symbol::Error, "Scene snapshot failed", |item| {
                    item.with_data(format!("{err:#}"))
                });
            }
        }
    }

    fn dispatch_map(&self, active: &mut ActiveSession, map: SpaceMap) {
        let at = active.stamp(self.clock.as_ref());
        let file = snapshot_file_name(at, "json");
        let asset_ref = format!("{MAPS_DIR}/{file}");
        let path = BundleLayout::maps_dir(&active.dir).join(&file);
        let data = json!({ "points": map.point_count(), "anchors": map.anchors.len() }).to_string();

        match active.writer.write_map(map, path, asset_ref.clone()) {
            Ok(()) => active.record_at(at, Symbol::Map, "Map", |item| {
                item.with_data(data).with_asset(asset_ref)
            }),
            Err(err) => {
                log_error!("Could not queue map snapshot: {err:#}");
                active.record_at(at, Symbol::Error, "Map snapshot failed", |item| {
                    item.with_data(format!("{err:#}"))
                });
            }
        }
    }

    pub fn on_anchor_added(&self, anchor: &Anchor) {
        self.record_anchor(anchor, anchor.added_symbol(), "added");
    }

    pub fn on_anchor_updated(&self, anchor: &Anchor) {
        self.record_anchor(anchor, anchor.updated_symbol(), "updated");
    }

    fn record_anchor(&self, anchor: &Anchor, kind: Symbol, verb: &str) {
        let mut inner = self.lock();
        let wanted = match anchor {
            Anchor::Plane(_) => inner.settings.auto_log_planes,
            Anchor::Face(_) => inner.settings.auto_log_faces,
            Anchor::Generic(_) => inner.settings.auto_log_anchors,
        };
        if !wanted {
            return;
        }
        let Some(active) = inner.running_session() else {
            return;
        };

        match encode_anchor(anchor) {
            Ok(data) => {
                let title = format!("{} {verb}", anchor.label());
                active.record(self.clock.as_ref(), kind, title, |item| item.with_data(data));
            }
            Err(err) => log_warn!("Skipping anchor {}: {err:#}", anchor.identifier()),
        }
    }

    pub fn on_tracking_state_changed(&self, state: TrackingState) {
        let mut inner = self.lock();
        if let Some(active) = inner.running_session() {
            active.record(self.clock.as_ref(), Symbol::Info, "Tracking", |item| {
                item.with_data(state.as_str())
            });
        }
    }

    // ----- programmatic logging -------------------------------------------

    pub fn info(&self, text: &str) {
        self.text(text, Level::Info, "");
    }

    pub fn debug(&self, text: &str) {
        self.text(text, Level::Debug, "");
    }

    pub fn warning(&self, text: &str) {
        self.text(text, Level::Warning, "");
    }

    pub fn error(&self, text: &str) {
        self.text(text, Level::Error, "");
    }

    pub fn severe(&self, text: &str) {
        self.text(text, Level::Severe, "");
    }

    /// Appends a message at `level`. With an empty `title` the text becomes
    /// the title. Mirrored into the process log.
    pub fn text(&self, text: &str, level: Level, title: &str) {
        let mut inner = self.lock();
        let Some(active) = inner.live_session() else {
            return;
        };
        log::log!(level.log_level(), "[session] {text}");
        let kind = Symbol::from(level);
        if title.is_empty() {
            active.record(self.clock.as_ref(), kind, text, identity);
        } else {
            active.record(self.clock.as_ref(), kind, title, |item| item.with_data(text));
        }
    }

    /// Appends a JSON payload. Invalid JSON is still recorded as given.
    pub fn data(&self, json_text: &str, title: &str) {
        let mut inner = self.lock();
        let Some(active) = inner.live_session() else {
            return;
        };
        if serde_json::from_str::<serde_json::Value>(json_text).is_err() {
            log_debug!("Data item '{title}' is not valid JSON");
        }
        active.record(self.clock.as_ref(), Symbol::Data, title, |item| item.with_data(json_text));
    }

    /// Records a touch at screen coordinates `point`.
    pub fn touch(&self, point: [f32; 2], is_long: bool, title: &str) {
        let mut inner = self.lock();
        let Some(active) = inner.live_session() else {
            return;
        };
        let title = match (title.is_empty(), is_long) {
            (false, _) => title.to_string(),
            (true, true) => "Long press".to_string(),
            (true, false) => "Touch".to_string(),
        };
        let data = json!({ "x": point[0], "y": point[1], "long": is_long }).to_string();
        active.record(self.clock.as_ref(), Symbol::Touch, title, |item| item.with_data(data));
    }

    /// Queues an assertion for the next session. Ignored while disabled;
    /// rejected once a session has started.
    pub fn register_test<P>(&self, description: &str, predicate: P, trigger: TestTrigger) -> Result<()>
    where
        P: Fn() -> bool + Send + 'static,
    {
        let mut inner = self.lock();
        if !inner.is_enabled() {
            return Ok(());
        }
        if inner.status != RecorderStatus::Idle {
            log_warn!("Test '{description}' registered after start; ignoring it");
            bail!("tests must be registered before the session starts");
        }
        let predicate: Predicate = Box::new(predicate);
        inner
            .pending_tests
            .register(ArTestCase::new(description, trigger, predicate));
        Ok(())
    }

    pub fn pending_tests(&self) -> usize {
        self.lock().pending_tests.len()
    }
}

/// Hands the host's observer back to the source. Dropping the recording
/// observer releases the recorder handle it holds.
fn restore_observer(source: &dyn ObservedSource, forward: &ForwardSlot) {
    let original = forward
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    drop(source.replace_observer(original));
}

fn video_info(summary: CaptureSummary) -> VideoInfo {
    VideoInfo {
        file: VIDEO_FILE.to_string(),
        first_sample_offset: summary.first_sample_offset,
        sample_count: summary.samples,
        byte_count: summary.bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, recorder::FrameObserver, spatial::SceneNode};
    use std::{fs, future::Future, pin::Pin, task::Poll};

    fn recorder_in(root: &Path, configure: impl FnOnce(&mut RecorderSettings)) -> (SessionRecorder, Arc<ManualClock>) {
        let mut settings = RecorderSettings {
            capture_grace_ms: 0,
            ..RecorderSettings::default()
        };
        configure(&mut settings);
        let clock = Arc::new(ManualClock::new());
        let recorder = SessionRecorder::with_clock(
            RecorderConfig {
                root: root.to_path_buf(),
                app: AppIdentity {
                    name: "Test".into(),
                    version: "0.1".into(),
                    bundle_id: "com.example.test".into(),
                },
                settings,
            },
            clock.clone(),
        );
        (recorder, clock)
    }

    struct SceneSource {
        nodes: Mutex<usize>,
    }

    impl SceneSource {
        fn graph(&self) -> SceneGraph {
            let count = *self.nodes.lock().unwrap();
            let mut root = SceneNode::new("root");
            for index in 0..count {
                root = root.with_child(SceneNode::new(format!("node-{index}")));
            }
            SceneGraph::new(root)
        }
    }

    impl ObservedSource for SceneSource {
        fn replace_observer(
            &self,
            _observer: Option<Box<dyn FrameObserver>>,
        ) -> Option<Box<dyn FrameObserver>> {
            None
        }

        fn scene_graph(&self) -> Option<SceneGraph> {
            Some(self.graph())
        }

        fn space_map(&self) -> Option<SpaceMap> {
            None
        }
    }

    fn kinds(log: &LogSession) -> Vec<Symbol> {
        log.items().iter().map(|item| item.kind).collect()
    }

    #[tokio::test]
    async fn start_and_stop_write_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, clock) = recorder_in(dir.path(), |_| {});

        recorder.start(None, "smoke").await.unwrap();
        assert_eq!(recorder.state().status, RecorderStatus::Running);
        recorder.info("hello");
        clock.advance_secs(2.0);

        let summary = recorder
            .stop(|log| log.user = Some("qa".into()))
            .await
            .unwrap();
        assert!(summary.persisted);
        assert!(!summary.upload_requested);
        assert_eq!(recorder.state().status, RecorderStatus::Idle);

        let log = BundleLayout::read_session(&summary.path).unwrap();
        assert_eq!(log.user.as_deref(), Some("qa"));
        assert_eq!(kinds(&log), vec![Symbol::Info, Symbol::Info, Symbol::Info]);
        assert_eq!(log.items()[0].title, "Recording started");
        assert!(log.items()[0].has_status());
        assert_eq!(log.items()[2].title, "Recording stopped");
        assert_eq!(log.items()[2].relative_time_seconds, 2.0);
        assert!(log.end_time.is_some());
        assert_eq!(summary.item_count, 3);
    }

    #[tokio::test]
    async fn second_start_and_idle_stop_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |_| {});

        assert!(recorder.stop(|_| {}).await.is_none());
        recorder.start(None, "first").await.unwrap();
        let id = recorder.state().session_id;
        recorder.start(None, "second").await.unwrap();
        assert_eq!(recorder.state().session_id, id);
        assert!(recorder.stop(|_| {}).await.is_some());
        assert!(recorder.stop(|_| {}).await.is_none());
    }

    #[tokio::test]
    async fn scene_changes_drive_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, clock) = recorder_in(dir.path(), |s| {
            s.camera_interval = 0.0;
            s.log_frame_rate = false;
            s.auto_log_map = false;
        });
        let source = Arc::new(SceneSource {
            nodes: Mutex::new(0),
        });

        recorder.start(Some(source.clone()), "scene").await.unwrap();
        for count in [5, 5, 5, 8, 8, 3] {
            *source.nodes.lock().unwrap() = count;
            recorder.on_frame(&Frame::default());
            clock.advance_secs(1.5);
        }
        let summary = recorder.stop(|_| {}).await.unwrap();

        let log = BundleLayout::read_session(&summary.path).unwrap();
        let scenes: Vec<&LogItem> = log
            .items()
            .iter()
            .filter(|item| item.kind == Symbol::Scene)
            .collect();
        assert_eq!(scenes.len(), 3);
        for scene in scenes {
            assert!(summary.path.join(&scene.asset_ref).is_file());
        }
    }

    #[tokio::test]
    async fn anchors_respect_switches() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |s| s.auto_log_faces = false);
        recorder.start(None, "anchors").await.unwrap();

        let generic = Anchor::Generic(crate::spatial::SpaceAnchor {
            identifier: "a1".into(),
            name: "chair".into(),
            transform: crate::spatial::IDENTITY,
        });
        let face = Anchor::Face(crate::spatial::DetectedFace {
            identifier: "f1".into(),
            transform: crate::spatial::IDENTITY,
            left_eye_transform: crate::spatial::IDENTITY,
            right_eye_transform: crate::spatial::IDENTITY,
            look_at_point: [0.0; 3],
            blend_shapes: Default::default(),
        });
        recorder.on_anchor_added(&generic);
        recorder.on_anchor_updated(&generic);
        recorder.on_anchor_added(&face);
        recorder.on_tracking_state_changed(TrackingState::Normal);

        let summary = recorder.stop(|_| {}).await.unwrap();
        let log = BundleLayout::read_session(&summary.path).unwrap();
        assert_eq!(
            kinds(&log),
            vec![
                Symbol::Info,
                Symbol::Anchor,
                Symbol::AnchorUpdate,
                Symbol::Info,
                Symbol::Info
            ]
        );
        assert!(log.items()[1].data.contains("\"chair\""));
        assert_eq!(log.items()[3].title, "Tracking");
        assert_eq!(log.items()[3].data, "normal");
    }

    #[tokio::test]
    async fn register_after_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |_| {});
        recorder
            .register_test("before", || true, TestTrigger::After(0.0))
            .unwrap();
        assert_eq!(recorder.pending_tests(), 1);

        recorder.start(None, "tests").await.unwrap();
        assert_eq!(recorder.pending_tests(), 0);
        assert!(recorder
            .register_test("after", || true, TestTrigger::EndOfSession)
            .is_err());
        recorder.stop(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn unlistable_root_disables_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("bundles");
        fs::write(&blocker, "not a directory").unwrap();
        let (recorder, _) = recorder_in(&blocker, |_| {});

        assert!(recorder.start(None, "broken").await.is_err());
        assert!(!recorder.is_enabled());
        assert_eq!(recorder.state().status, RecorderStatus::Idle);

        recorder.set_enabled(true).unwrap();
        assert!(!recorder.is_enabled());
        recorder.start(None, "again").await.unwrap();
        assert_eq!(recorder.state().status, RecorderStatus::Idle);
    }

    #[tokio::test]
    async fn settings_locked_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |_| {});
        recorder.start(None, "locked").await.unwrap();
        assert!(recorder.configure(RecorderSettings::default()).is_err());
        assert!(recorder.set_enabled(false).is_err());
        recorder.stop(|_| {}).await.unwrap();
        assert!(recorder.set_enabled(false).is_ok());
        assert!(!recorder.is_enabled());
    }

    /// Capture that only holds on to its sink.
    #[derive(Default)]
    struct IdleCapture {
        sink: Option<CaptureSink>,
    }

    impl ScreenCapture for IdleCapture {
        fn start(&mut self, sink: CaptureSink) -> Result<()> {
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.sink = None;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finalizer_can_log_through_the_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, clock) = recorder_in(dir.path(), |_| {});
        recorder.start(None, "late").await.unwrap();
        clock.advance_secs(1.0);

        let handle = recorder.clone();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            recorder.stop(move |log| {
                handle.info("late note");
                log.user = Some("finalizer".into());
            }),
        )
        .await
        .expect("stop finished")
        .unwrap();

        let log = BundleLayout::read_session(&summary.path).unwrap();
        let titles: Vec<&str> = log.items().iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["Recording started", "late note", "Recording stopped"]);
        assert_eq!(log.user.as_deref(), Some("finalizer"));
        assert_eq!(summary.item_count, 3);
    }

    #[tokio::test]
    async fn panicking_finalizer_is_recorded_and_the_bundle_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |_| {});
        recorder.start(None, "panics").await.unwrap();

        let summary = recorder
            .stop(|_| panic!("finalizer blew up"))
            .await
            .unwrap();
        assert!(summary.persisted);
        assert_eq!(recorder.state().status, RecorderStatus::Idle);

        let log = BundleLayout::read_session(&summary.path).unwrap();
        assert_eq!(
            kinds(&log),
            vec![Symbol::Info, Symbol::Severe, Symbol::Info]
        );
        assert_eq!(log.items()[1].title, "Session finalizer panicked");

        recorder.start(None, "after panic").await.unwrap();
        assert_eq!(recorder.state().status, RecorderStatus::Running);
        recorder.stop(|_| {}).await.unwrap();
    }

    #[tokio::test]
    async fn stop_completes_when_the_caller_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |s| s.capture_grace_ms = 300);
        recorder
            .attach_capture(Box::new(IdleCapture::default()))
            .unwrap();
        recorder.start(None, "impatient").await.unwrap();
        let folder = recorder.state().folder.unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(20), recorder.stop(|_| {})).await;
        assert!(outcome.is_err(), "stop should still be in its capture grace period");

        for _ in 0..200 {
            if recorder.state().status == RecorderStatus::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(recorder.state().status, RecorderStatus::Idle);

        let log = BundleLayout::read_session(&dir.path().join(&folder)).unwrap();
        assert_eq!(log.items().last().unwrap().title, "Recording stopped");
        assert!(log.video.is_some());

        recorder.start(None, "next").await.unwrap();
        assert_eq!(recorder.state().status, RecorderStatus::Running);
        assert!(recorder.stop(|_| {}).await.is_some());
    }

    #[tokio::test]
    async fn scene_asset_name_matches_item_time() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, clock) = recorder_in(dir.path(), |s| {
            s.camera_interval = 0.0;
            s.log_frame_rate = false;
            s.auto_log_map = false;
        });
        let source = Arc::new(SceneSource {
            nodes: Mutex::new(2),
        });
        recorder.start(Some(source.clone()), "names").await.unwrap();

        // Stepping the clock back leaves the last item ahead of elapsed time.
        clock.advance_secs(2.0);
        recorder.text("ahead", Level::Info, "");
        clock.set(Duration::from_millis(1250));
        recorder.on_frame(&Frame::default());
        let summary = recorder.stop(|_| {}).await.unwrap();

        let log = BundleLayout::read_session(&summary.path).unwrap();
        let scene = log
            .items()
            .iter()
            .find(|item| item.kind == Symbol::Scene)
            .unwrap();
        assert_eq!(
            scene.asset_ref,
            format!("scenes/{}", snapshot_file_name(scene.relative_time_seconds, "json"))
        );
        assert_eq!(scene.relative_time_seconds, 2.0);
        assert!(summary.path.join(&scene.asset_ref).is_file());
    }

    #[tokio::test]
    async fn dropped_start_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (recorder, _) = recorder_in(dir.path(), |_| {});

        // Polled once, then dropped while the bundle is being prepared.
        let mut start = Box::pin(recorder.start(None, "dropped"));
        let first = poll_once(start.as_mut()).await;
        drop(start);
        if first.is_none() {
            assert_eq!(recorder.state().status, RecorderStatus::Idle);
        }

        recorder.start(None, "kept").await.unwrap();
        assert_eq!(recorder.state().status, RecorderStatus::Running);
        recorder.stop(|_| {}).await.unwrap();
    }

    /// Polls `future` once; `None` if it was still pending.
    async fn poll_once<F: Future + Unpin>(mut future: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| {
            Poll::Ready(match Pin::new(&mut future).poll(cx) {
                Poll::Ready(output) => Some(output),
                Poll::Pending => None,
            })
        })
        .await
    }
}
