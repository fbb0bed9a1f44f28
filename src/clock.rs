use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Wall-clock milliseconds. Only differences matter.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> f64;
}

pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven time, for tests and headless runs.
#[derive(Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<Mutex<f64>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        *self.now.lock() = ms;
    }

    pub fn advance(&self, ms: f64) {
        *self.now.lock() += ms;
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}

/// Elapsed-time bookkeeping for a session.
///
/// Elapsed time is always derived from the anchor, never accumulated, so it
/// cannot drift away from `start_time`.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    start_time: f64,
    pause_offset: f64,
    paused_at: f64,
    duration: f64,
}

impl SessionClock {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn start(&mut self, now: f64) {
        self.start_time = now;
        self.pause_offset = 0.0;
        self.paused_at = 0.0;
    }

    pub fn pause(&mut self, now: f64) {
        if !self.is_paused() {
            // a zero timestamp would read as "running"
            self.paused_at = now.max(f64::MIN_POSITIVE);
        }
    }

    pub fn resume(&mut self, now: f64) {
        if self.is_paused() {
            self.pause_offset += now - self.paused_at;
            self.paused_at = 0.0;
        }
    }

    /// Makes `elapsed` equal `target` immediately without moving the anchor.
    pub fn seek(&mut self, target: f64, now: f64) {
        let reference = if self.is_paused() { self.paused_at } else { now };
        self.pause_offset = reference - self.start_time - target * 1000.0;
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at != 0.0
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Unclamped elapsed seconds; may exceed the duration.
    pub fn raw_elapsed(&self, now: f64) -> f64 {
        let reference = if self.is_paused() { self.paused_at } else { now };
        (reference - self.start_time - self.pause_offset) / 1000.0
    }

    /// Elapsed seconds clamped to `[0, duration)`.
    pub fn elapsed(&self, now: f64) -> f64 {
        let upper = (self.duration - 1e-9).max(0.0);
        self.raw_elapsed(now).clamp(0.0, upper)
    }

    pub fn is_finished(&self, now: f64) -> bool {
        self.raw_elapsed(now) >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_is_idempotent() {
        let mut clock = SessionClock::new(600.0);
        clock.start(1_000.0);
        for &t in &[0.0, 12.5, 300.0, 599.0] {
            clock.seek(t, 5_000.0);
            assert!((clock.elapsed(5_000.0) - t).abs() < 1e-9);
            clock.seek(t, 5_000.0);
            assert!((clock.elapsed(5_000.0) - t).abs() < 1e-9);
        }
    }

    #[test]
    fn seek_while_paused_uses_pause_instant() {
        let mut clock = SessionClock::new(600.0);
        clock.start(0.0);
        clock.pause(10_000.0);
        clock.seek(42.0, 25_000.0);
        assert!((clock.elapsed(30_000.0) - 42.0).abs() < 1e-9);
        clock.resume(40_000.0);
        assert!((clock.elapsed(40_000.0) - 42.0).abs() < 1e-9);
        assert!((clock.elapsed(41_000.0) - 43.0).abs() < 1e-9);
    }

    #[test]
    fn pause_interval_does_not_count() {
        let mut clock = SessionClock::new(600.0);
        clock.start(500.0);
        let before = clock.elapsed(20_500.0);
        clock.pause(20_500.0);
        assert_eq!(clock.elapsed(90_000.0), before);
        clock.resume(90_000.0);
        assert!((clock.elapsed(90_000.0) - before).abs() < 1e-9);
    }

    #[test]
    fn elapsed_is_clamped_but_raw_is_not() {
        let mut clock = SessionClock::new(10.0);
        clock.start(0.0);
        assert!(clock.elapsed(20_000.0) < 10.0);
        assert_eq!(clock.raw_elapsed(20_000.0), 20.0);
        assert!(clock.is_finished(20_000.0));
        clock.seek(-3.0, 20_000.0);
        assert_eq!(clock.elapsed(20_000.0), 0.0);
    }

    #[test]
    fn manual_time_source_advances() {
        let t = ManualTimeSource::new();
        t.advance(250.0);
        t.advance(250.0);
        assert_eq!(t.now_ms(), 500.0);
    }
}
