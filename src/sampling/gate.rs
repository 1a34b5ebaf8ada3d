/// Time gate for one auto-logged stream. Times are seconds since session start.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamGate {
    interval: f64,
    watermark: f64,
}

impl StreamGate {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            watermark: 0.0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0.0
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    /// Makes the stream eligible at `now`.
    pub fn reset(&mut self, now: f64) {
        self.watermark = now;
    }

    /// True once `now` reaches the watermark; the watermark then moves to
    /// `now + interval`, so a late tick never triggers a catch-up burst.
    pub fn poll(&mut self, now: f64) -> bool {
        if !self.is_enabled() || now < self.watermark {
            return false;
        }
        self.watermark = now + self.interval;
        true
    }
}

/// Time gate plus "has the observed count changed since the last emission".
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeGate {
    gate: StreamGate,
    last_emitted: Option<usize>,
}

impl ChangeGate {
    pub fn new(interval: f64) -> Self {
        Self {
            gate: StreamGate::new(interval),
            last_emitted: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    pub fn reset(&mut self, now: f64) {
        self.gate.reset(now);
        self.last_emitted = None;
    }

    /// Time gate only. Advances the watermark whether or not anything is emitted.
    pub fn due(&mut self, now: f64) -> bool {
        self.gate.poll(now)
    }

    pub fn changed(&self, count: usize) -> bool {
        self.last_emitted != Some(count)
    }

    pub fn commit(&mut self, count: usize) {
        self.last_emitted = Some(count);
    }

    #[cfg(test)]
    fn last_emitted(&self) -> Option<usize> {
        self.last_emitted
    }
}

/// Counts ticks and reports them roughly once per second.
///
/// The window restarts from the tick that closed it rather than from a fixed
/// schedule, so jittery ticks bias the reported rate slightly.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRateCounter {
    ticks: u32,
    watermark: f64,
}

pub const FRAME_RATE_WINDOW_SECS: f64 = 1.0;

impl FrameRateCounter {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            watermark: FRAME_RATE_WINDOW_SECS,
        }
    }

    pub fn reset(&mut self, now: f64) {
        self.ticks = 0;
        self.watermark = now + FRAME_RATE_WINDOW_SECS;
    }

    pub fn tick(&mut self, now: f64) -> Option<u32> {
        self.ticks = self.ticks.saturating_add(1);
        if now < self.watermark {
            return None;
        }
        let rate = self.ticks;
        self.ticks = 0;
        self.watermark = now + FRAME_RATE_WINDOW_SECS;
        Some(rate)
    }
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_gate_fires_then_waits_interval() {
        let mut gate = StreamGate::new(1.0);
        gate.reset(0.0);
        assert!(gate.poll(0.0));
        assert!(!gate.poll(0.5));
        assert!(!gate.poll(0.99));
        assert!(gate.poll(1.0));
        assert_eq!(gate.watermark(), 2.0);
    }

    #[test]
    fn late_tick_does_not_burst() {
        let mut gate = StreamGate::new(1.0);
        gate.reset(0.0);
        assert!(gate.poll(0.0));
        assert!(gate.poll(10.0));
        assert!(!gate.poll(10.5));
        assert!(gate.poll(11.0));
    }

    #[test]
    fn zero_interval_disables() {
        let mut gate = StreamGate::disabled();
        gate.reset(0.0);
        assert!(!gate.is_enabled());
        assert!(!gate.poll(0.0));
        assert!(!gate.poll(100.0));
    }

    #[test]
    fn change_gate_first_count_is_a_change() {
        let mut gate = ChangeGate::new(1.0);
        gate.reset(0.0);
        assert!(gate.changed(0));
        gate.commit(0);
        assert!(!gate.changed(0));
        assert!(gate.changed(1));
    }

    #[test]
    fn change_gate_reset_forgets_last_count() {
        let mut gate = ChangeGate::new(1.0);
        gate.commit(7);
        gate.reset(3.0);
        assert_eq!(gate.last_emitted(), None);
        assert!(!gate.due(2.0));
        assert!(gate.due(3.0));
    }

    #[test]
    fn frame_rate_reports_ticks_per_window() {
        let mut fps = FrameRateCounter::new();
        fps.reset(0.0);
        let mut reported = Vec::new();
        for frame in 1..=120 {
            if let Some(rate) = fps.tick(frame as f64 / 60.0) {
                reported.push(rate);
            }
        }
        assert_eq!(reported, vec![60, 60]);
    }
}
