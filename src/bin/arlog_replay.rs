//! Drives the recorder with a synthetic AR session and writes a real bundle.
//!
//! Usage: `arlog-replay [bundle-root] [seconds]`
//!
//! Recorder settings live in `recorder.json` under the bundle root and are
//! created on first run.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use arlog::{
    spatial::{
        row_major_from_columns, Anchor, DetectedPlane, PlaneAlignment, PlaneClassification,
        SceneGraph, SceneNode, SpaceAnchor, SpaceMap, TrackingState, IDENTITY,
    },
    AppIdentity, CaptureSink, Frame, FrameObserver, ManualClock, ObservedSource, RecorderConfig,
    RecorderSettings, ScreenCapture, SessionRecorder, SettingsStore, TestTrigger,
};
use log::info;

const FRAME_RATE: u32 = 60;

/// Fake engine: grows its scene and point cloud over time.
#[derive(Default)]
struct SyntheticSource {
    observer: Mutex<Option<Box<dyn FrameObserver>>>,
    nodes: Mutex<usize>,
    points: Mutex<Vec<[f32; 3]>>,
}

impl SyntheticSource {
    fn dispatch(&self, call: impl FnOnce(&mut dyn FrameObserver)) {
        let mut observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(observer) = observer.as_mut() {
            call(observer.as_mut());
        }
    }
}

impl ObservedSource for SyntheticSource {
    fn replace_observer(
        &self,
        observer: Option<Box<dyn FrameObserver>>,
    ) -> Option<Box<dyn FrameObserver>> {
        std::mem::replace(
            &mut *self.observer.lock().unwrap_or_else(PoisonError::into_inner),
            observer,
        )
    }

    fn scene_graph(&self) -> Option<SceneGraph> {
        let count = *self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        let root = (0..count).fold(SceneNode::new("root"), |root, index| {
            root.with_child(SceneNode::new(format!("cube-{index}")))
        });
        Some(SceneGraph::new(root))
    }

    fn space_map(&self) -> Option<SpaceMap> {
        let points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        Some(SpaceMap::from_points([0.0; 3], [4.0, 2.5, 4.0], Vec::new(), &points))
    }
}

/// Host observer that just counts frames, to show forwarding survives.
struct FrameCounter(Arc<Mutex<u64>>);

impl FrameObserver for FrameCounter {
    fn on_frame_update(&mut self, _frame: &Frame) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

/// Capture stand-in that emits a fake encoded sample every other frame.
#[derive(Clone, Default)]
struct SyntheticCapture {
    sink: Arc<Mutex<Option<CaptureSink>>>,
}

impl SyntheticCapture {
    fn emit(&self, pts: Duration) {
        if let Some(sink) = self.sink.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            sink.append(&[0u8; 512], pts);
        }
    }
}

impl ScreenCapture for SyntheticCapture {
    fn start(&mut self, sink: CaptureSink) -> Result<()> {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

fn pose_at(seconds: f64) -> [f32; 16] {
    let x = (seconds * 0.2).sin() as f32;
    let z = (seconds * 0.2).cos() as f32;
    row_major_from_columns([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [x, 1.4, z, 1.0],
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    arlog::init_logging();

    let mut args = std::env::args().skip(1);
    let root = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("arlog-bundles"));
    let seconds: u32 = match args.next() {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid duration '{raw}'"))?,
        None => 10,
    };

    let settings_path = root.join("recorder.json");
    let first_run = !settings_path.exists();
    let store = SettingsStore::new(settings_path)?;
    if first_run {
        store.update(RecorderSettings {
            max_saved_sessions: 5,
            ..store.settings()
        })?;
        info!("Wrote default recorder settings under {}", root.display());
    }

    let clock = Arc::new(ManualClock::new());
    let recorder = SessionRecorder::with_clock(
        RecorderConfig {
            root,
            app: AppIdentity {
                name: "arlog-replay".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                bundle_id: "dev.arlog.replay".into(),
            },
            settings: store.settings(),
        },
        clock.clone(),
    );

    let source = Arc::new(SyntheticSource::default());
    let host_frames = Arc::new(Mutex::new(0u64));
    source.replace_observer(Some(Box::new(FrameCounter(Arc::clone(&host_frames)))));

    let capture = SyntheticCapture::default();
    recorder.attach_capture(Box::new(capture.clone()))?;

    let scene_source = Arc::clone(&source);
    recorder.register_test(
        "scene has content after two seconds",
        move || {
            *scene_source
                .nodes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                > 0
        },
        TestTrigger::After(2.0),
    )?;
    recorder.register_test("replay finished", || true, TestTrigger::EndOfSession)?;

    recorder.start(Some(source.clone()), "synthetic replay").await?;

    let frame_step = Duration::from_secs(1) / FRAME_RATE;
    let total_frames = seconds * FRAME_RATE;
    for frame_index in 0..total_frames {
        let now = f64::from(frame_index) / f64::from(FRAME_RATE);

        if frame_index % FRAME_RATE == 0 {
            *source.nodes.lock().unwrap_or_else(PoisonError::into_inner) =
                (frame_index / (FRAME_RATE * 3)) as usize + 1;
            let mut points = source.points.lock().unwrap_or_else(PoisonError::into_inner);
            let t = now as f32;
            points.push([t.sin(), 0.0, t.cos()]);
        }

        if frame_index == FRAME_RATE / 2 {
            source.dispatch(|observer| observer.on_tracking_state_changed(TrackingState::Normal));
            source.dispatch(|observer| {
                observer.on_anchor_added(&Anchor::Plane(DetectedPlane {
                    identifier: "floor-0".into(),
                    transform: IDENTITY,
                    center: [0.0; 3],
                    extent: [2.0, 0.0, 3.0],
                    alignment: PlaneAlignment::Horizontal,
                    classification: PlaneClassification::Floor,
                }))
            });
        }
        if frame_index == FRAME_RATE * 4 {
            source.dispatch(|observer| {
                observer.on_anchor_added(&Anchor::Generic(SpaceAnchor {
                    identifier: "marker-1".into(),
                    name: "marker".into(),
                    transform: pose_at(now),
                }))
            });
            recorder.touch([0.5, 0.5], false, "");
        }

        let frame = Frame {
            pose: arlog::spatial::CameraPose {
                transform: pose_at(now),
            },
            tracking_state: TrackingState::Normal,
            feature_point_count: source
                .points
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        };
        source.dispatch(|observer| observer.on_frame_update(&frame));

        if frame_index % 2 == 0 {
            capture.emit(frame_step * frame_index);
        }
        clock.advance(frame_step);
    }

    let summary = recorder
        .stop(move |log| {
            log.user = Some("replay".into());
            log.metadata.insert("frames".into(), total_frames.to_string());
        })
        .await
        .context("recorder was not running")?;

    info!(
        "Host observer saw {} frames",
        *host_frames.lock().unwrap_or_else(PoisonError::into_inner)
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
