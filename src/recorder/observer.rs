//! Engine-facing callback seam and the interposed recording observer.

use std::sync::{Arc, Mutex, PoisonError};

use crate::spatial::{Anchor, CameraPose, SceneGraph, SpaceMap, TrackingState};

use super::SessionRecorder;

/// What the engine reports for each rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame {
    pub pose: CameraPose,
    pub tracking_state: TrackingState,
    /// Feature points in the current world map estimate.
    pub feature_point_count: usize,
}

/// Receiver of engine callbacks. Every method defaults to doing nothing.
pub trait FrameObserver: Send {
    fn on_frame_update(&mut self, _frame: &Frame) {}
    fn on_anchor_added(&mut self, _anchor: &Anchor) {}
    fn on_anchor_updated(&mut self, _anchor: &Anchor) {}
    fn on_tracking_state_changed(&mut self, _state: TrackingState) {}
}

/// The AR engine as the recorder sees it.
///
/// Implementations must not hold a lock that `scene_graph`/`space_map` need
/// while they dispatch callbacks into the installed observer.
pub trait ObservedSource: Send + Sync {
    /// Installs `observer` and hands back the one it replaces.
    fn replace_observer(
        &self,
        observer: Option<Box<dyn FrameObserver>>,
    ) -> Option<Box<dyn FrameObserver>>;

    fn scene_graph(&self) -> Option<SceneGraph>;

    fn space_map(&self) -> Option<SpaceMap>;
}

/// Slot holding the host's own observer while a session is recording.
pub(crate) type ForwardSlot = Arc<Mutex<Option<Box<dyn FrameObserver>>>>;

/// Installed on the source for the duration of a session. Forwards every
/// callback to the host's observer first, then records it.
pub struct RecordingObserver {
    forward: ForwardSlot,
    recorder: SessionRecorder,
}

impl RecordingObserver {
    pub(crate) fn new(forward: ForwardSlot, recorder: SessionRecorder) -> Self {
        Self { forward, recorder }
    }

    fn forward(&self, call: impl FnOnce(&mut dyn FrameObserver)) {
        let mut slot = self.forward.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(observer) = slot.as_mut() {
            call(observer.as_mut());
        }
    }
}

impl FrameObserver for RecordingObserver {
    fn on_frame_update(&mut self, frame: &Frame) {
        self.forward(|observer| observer.on_frame_update(frame));
        self.recorder.on_frame(frame);
    }

    fn on_anchor_added(&mut self, anchor: &Anchor) {
        self.forward(|observer| observer.on_anchor_added(anchor));
        self.recorder.on_anchor_added(anchor);
    }

    fn on_anchor_updated(&mut self, anchor: &Anchor) {
        self.forward(|observer| observer.on_anchor_updated(anchor));
        self.recorder.on_anchor_updated(anchor);
    }

    fn on_tracking_state_changed(&mut self, state: TrackingState) {
        self.forward(|observer| observer.on_tracking_state_changed(state));
        self.recorder.on_tracking_state_changed(state);
    }
}
