use crate::settings::RecorderSettings;

use super::gate::{ChangeGate, FrameRateCounter, StreamGate};

/// Decides, tick by tick, which auto-logged streams emit.
///
/// Pure bookkeeping: the caller supplies the session time and the observed
/// counts, the engine answers and updates its watermarks.
#[derive(Debug, Clone)]
pub struct SamplingEngine {
    pose: StreamGate,
    scene: ChangeGate,
    map: ChangeGate,
    tests: StreamGate,
    frame_rate: Option<FrameRateCounter>,
    continuous_scene: bool,
}

impl SamplingEngine {
    pub fn new(settings: &RecorderSettings) -> Self {
        let settings = settings.sanitized();
        let scene_interval = if settings.auto_log_scene {
            settings.scene_interval
        } else {
            0.0
        };
        let map_interval = if settings.auto_log_map {
            settings.map_interval
        } else {
            0.0
        };

        Self {
            pose: StreamGate::new(settings.camera_interval),
            scene: ChangeGate::new(scene_interval),
            map: ChangeGate::new(map_interval),
            tests: StreamGate::new(settings.camera_interval),
            frame_rate: settings.log_frame_rate.then(FrameRateCounter::new),
            continuous_scene: settings.continuously_log_scene,
        }
    }

    /// Resets every watermark to `now` and forgets previously emitted counts.
    pub fn reset(&mut self, now: f64) {
        self.pose.reset(now);
        self.scene.reset(now);
        self.map.reset(now);
        self.tests.reset(now);
        if let Some(frame_rate) = self.frame_rate.as_mut() {
            frame_rate.reset(now);
        }
    }

    pub fn poll_pose(&mut self, now: f64) -> bool {
        self.pose.poll(now)
    }

    /// Test cases are checked at the pose cadence, or on every tick when the
    /// pose stream is off.
    pub fn poll_tests(&mut self, now: f64) -> bool {
        if !self.tests.is_enabled() {
            return true;
        }
        self.tests.poll(now)
    }

    pub fn tick_frame_rate(&mut self, now: f64) -> Option<u32> {
        self.frame_rate.as_mut().and_then(|counter| counter.tick(now))
    }

    pub fn scene_enabled(&self) -> bool {
        self.scene.is_enabled()
    }

    pub fn map_enabled(&self) -> bool {
        self.map.is_enabled()
    }

    /// Time gate of the scene stream. Advances the watermark even if the scene
    /// turns out to be unchanged.
    pub fn scene_due(&mut self, now: f64) -> bool {
        self.scene.due(now)
    }

    /// Change gate of the scene stream; commits `node_count` when it emits.
    pub fn accept_scene(&mut self, node_count: usize) -> bool {
        if self.continuous_scene || self.scene.changed(node_count) {
            self.scene.commit(node_count);
            return true;
        }
        false
    }

    /// Both scene gates in one call.
    #[cfg(test)]
    fn sample_scene(&mut self, now: f64, node_count: usize) -> bool {
        self.scene_due(now) && self.accept_scene(node_count)
    }

    /// Time gate of the map stream combined with a feature-count change check.
    /// Does not commit; call [`SamplingEngine::commit_map`] once the snapshot
    /// actually exists.
    pub fn map_due(&mut self, now: f64, feature_points: usize) -> bool {
        self.map.due(now) && self.map.changed(feature_points)
    }

    pub fn commit_map(&mut self, feature_points: usize) {
        self.map.commit(feature_points);
    }

    #[cfg(test)]
    fn sample_map(&mut self, now: f64, feature_points: usize) -> bool {
        if self.map_due(now, feature_points) {
            self.commit_map(feature_points);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(configure: impl FnOnce(&mut RecorderSettings)) -> SamplingEngine {
        let mut settings = RecorderSettings::default();
        configure(&mut settings);
        let mut engine = SamplingEngine::new(&settings);
        engine.reset(0.0);
        engine
    }

    #[test]
    fn scene_emits_only_on_count_changes() {
        let mut engine = engine(|s| s.scene_interval = 1.0);
        let counts = [5, 5, 5, 8, 8, 3];
        let emitted: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(tick, count)| engine.sample_scene(*tick as f64 * 1.5, **count))
            .map(|(_, count)| *count)
            .collect();
        assert_eq!(emitted, vec![5, 8, 3]);
    }

    #[test]
    fn continuous_scene_emits_every_interval() {
        let mut engine = engine(|s| {
            s.scene_interval = 1.0;
            s.continuously_log_scene = true;
        });
        let emissions = [5, 5, 5, 8, 8, 3]
            .iter()
            .enumerate()
            .filter(|(tick, count)| engine.sample_scene(*tick as f64 * 1.5, **count))
            .count();
        assert_eq!(emissions, 6);
    }

    #[test]
    fn unchanged_scene_still_advances_watermark() {
        let mut engine = engine(|s| s.scene_interval = 1.0);
        assert!(engine.sample_scene(0.0, 5));
        // Unchanged at 1.0: not emitted, but the gate moved to 2.0.
        assert!(!engine.sample_scene(1.0, 5));
        // A change right after does not burst out before the new watermark.
        assert!(!engine.sample_scene(1.2, 9));
        assert!(engine.sample_scene(2.0, 9));
    }

    #[test]
    fn map_waits_for_commit() {
        let mut engine = engine(|s| s.map_interval = 2.0);
        assert!(engine.map_due(0.0, 100));
        // Snapshot unavailable: nothing committed, next due tick retries.
        assert!(engine.map_due(2.0, 100));
        engine.commit_map(100);
        assert!(!engine.map_due(4.0, 100));
        assert!(engine.sample_map(6.0, 140));
    }

    #[test]
    fn disabled_streams_never_fire() {
        let mut engine = engine(|s| {
            s.auto_log_scene = false;
            s.auto_log_map = false;
            s.camera_interval = 0.0;
            s.log_frame_rate = false;
        });
        assert!(!engine.scene_enabled());
        assert!(!engine.map_enabled());
        for tick in 0..10 {
            let now = tick as f64;
            assert!(!engine.poll_pose(now));
            assert!(!engine.sample_scene(now, tick));
            assert!(!engine.sample_map(now, tick));
            assert_eq!(engine.tick_frame_rate(now), None);
            // Tests fall back to every tick.
            assert!(engine.poll_tests(now));
        }
    }

    #[test]
    fn pose_follows_camera_interval() {
        let mut engine = engine(|s| s.camera_interval = 0.5);
        let fired: Vec<bool> = [0.0, 0.25, 0.5, 0.6, 1.0]
            .iter()
            .map(|now| engine.poll_pose(*now))
            .collect();
        assert_eq!(fired, vec![true, false, true, false, true]);
    }
}
