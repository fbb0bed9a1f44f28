use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Set { time: f64, value: f32 },
    Linear { time: f64, value: f32 },
    Exponential { time: f64, value: f32 },
}

impl Event {
    fn time(&self) -> f64 {
        match *self {
            Event::Set { time, .. } | Event::Linear { time, .. } | Event::Exponential { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            Event::Set { value, .. } | Event::Linear { value, .. } | Event::Exponential { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampCurve {
    Linear,
    Exponential,
}

#[derive(Debug)]
struct Timeline {
    default: f32,
    events: Vec<Event>,
}

impl Timeline {
    fn insert(&mut self, event: Event) {
        // events at equal times keep insertion order
        let idx = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(idx, event);
    }

    fn value_at(&self, t: f64) -> f32 {
        let idx = self.events.partition_point(|e| e.time() <= t);
        let (t0, v0) = match idx.checked_sub(1).map(|i| self.events[i]) {
            Some(e) => (e.time(), e.value()),
            None => return self.default,
        };
        match self.events.get(idx) {
            Some(&Event::Linear { time: t1, value: v1 }) => {
                let span = t1 - t0;
                if span <= 0.0 {
                    return v1;
                }
                let frac = ((t - t0) / span) as f32;
                v0 + (v1 - v0) * frac
            }
            Some(&Event::Exponential { time: t1, value: v1 }) => {
                let span = t1 - t0;
                if span <= 0.0 {
                    return v1;
                }
                if v0 <= 0.0 || v1 <= 0.0 {
                    // undefined curve: hold until the ramp's end
                    return v0;
                }
                let frac = (t - t0) / span;
                (v0 as f64 * (v1 as f64 / v0 as f64).powf(frac)) as f32
            }
            _ => v0,
        }
    }

    fn cancel_from(&mut self, t: f64) {
        self.events.retain(|e| e.time() < t);
    }

    /// Drops events that can no longer influence values at or after `t`,
    /// folding the last one into the default.
    fn prune_before(&mut self, t: f64) {
        let idx = self.events.partition_point(|e| e.time() <= t);
        if idx > 1 {
            self.events.drain(..idx - 1);
        }
        if let Some(first) = self.events.first() {
            if first.time() <= t {
                self.default = first.value();
            }
        }
    }
}

/// A schedulable parameter shared between the control thread, which writes
/// future automation, and the render thread, which only evaluates it.
///
/// Times are in output-graph seconds. Semantics follow the usual
/// automation model: a ramp runs from the previous event to its own time
/// and value; `Set` events are steps.
#[derive(Debug, Clone)]
pub struct AudioParam {
    inner: Arc<Mutex<Timeline>>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Timeline {
                default: value,
                events: Vec::new(),
            })),
        }
    }

    pub fn set_value_at_time(&self, value: f32, time: f64) {
        self.inner.lock().insert(Event::Set { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&self, value: f32, time: f64) {
        self.inner.lock().insert(Event::Linear { time, value });
    }

    pub fn exponential_ramp_to_value_at_time(&self, value: f32, time: f64) {
        self.inner.lock().insert(Event::Exponential { time, value });
    }

    /// Removes every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&self, time: f64) {
        self.inner.lock().cancel_from(time);
    }

    pub fn value_at(&self, time: f64) -> f32 {
        self.inner.lock().value_at(time)
    }

    /// Replaces all automation with a constant.
    pub fn set_value(&self, value: f32) {
        let mut tl = self.inner.lock();
        tl.events.clear();
        tl.default = value;
    }

    /// Cancel, snapshot the current value, then ramp. Overlapping calls
    /// always continue from wherever the previous ramp had reached.
    pub fn ramp_to(&self, target: f32, now: f64, seconds: f64, curve: RampCurve) {
        let mut tl = self.inner.lock();
        let current = tl.value_at(now);
        tl.cancel_from(now);
        tl.insert(Event::Set { time: now, value: current });
        let end = now + seconds.max(0.0);
        match curve {
            RampCurve::Linear => tl.insert(Event::Linear { time: end, value: target }),
            RampCurve::Exponential => tl.insert(Event::Exponential { time: end, value: target }),
        }
    }

    pub fn fade_to(&self, target: f32, now: f64, seconds: f64) {
        self.ramp_to(target, now, seconds, RampCurve::Linear);
    }

    /// Evaluates one value per frame starting at `start`, then discards
    /// history the render cursor has passed.
    pub fn fill(&self, start: f64, sample_rate: f32, out: &mut [f32]) {
        let mut tl = self.inner.lock();
        if tl.events.is_empty() {
            out.fill(tl.default);
            return;
        }
        let dt = 1.0 / sample_rate as f64;
        for (i, v) in out.iter_mut().enumerate() {
            *v = tl.value_at(start + i as f64 * dt);
        }
        tl.prune_before(start);
    }

    pub fn pending_events(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Scheduled breakpoints in `[from, to)` as `(time, value)` pairs.
    pub fn breakpoints(&self, from: f64, to: f64) -> Vec<(f64, f32)> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.time() >= from && e.time() < to)
            .map(|e| (e.time(), e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_ramp_interpolates_from_previous_event() {
        let p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 1.0);
        p.linear_ramp_to_value_at_time(1.0, 2.0);
        assert_eq!(p.value_at(0.5), 0.0);
        assert!((p.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(p.value_at(3.0), 1.0);
    }

    #[test]
    fn exponential_ramp_is_geometric() {
        let p = AudioParam::new(1.0);
        p.set_value_at_time(1.0, 0.0);
        p.exponential_ramp_to_value_at_time(4.0, 2.0);
        assert!((p.value_at(1.0) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn exponential_ramp_from_zero_holds() {
        let p = AudioParam::new(0.0);
        p.set_value_at_time(0.0, 0.0);
        p.exponential_ramp_to_value_at_time(1.0, 1.0);
        assert_eq!(p.value_at(0.5), 0.0);
        assert_eq!(p.value_at(1.0), 1.0);
    }

    #[test]
    fn overlapping_fades_continue_without_jump() {
        let p = AudioParam::new(0.0);
        p.fade_to(1.0, 0.0, 2.0);
        let mid = p.value_at(1.0);
        p.fade_to(0.0, 1.0, 1.0);
        assert!((p.value_at(1.0) - mid).abs() < 1e-6);
        assert!((p.value_at(1.5) - mid / 2.0).abs() < 1e-5);
        assert_eq!(p.value_at(2.5), 0.0);
    }

    #[test]
    fn cancel_drops_future_events_only() {
        let p = AudioParam::new(0.0);
        p.set_value_at_time(1.0, 1.0);
        p.set_value_at_time(2.0, 2.0);
        p.set_value_at_time(3.0, 3.0);
        p.cancel_scheduled_values(2.0);
        assert_eq!(p.value_at(5.0), 1.0);
        assert_eq!(p.pending_events(), 1);
    }

    #[test]
    fn fill_prunes_history_but_keeps_values() {
        let p = AudioParam::new(0.0);
        p.set_value_at_time(0.5, 0.0);
        p.set_value_at_time(0.25, 0.001);
        p.linear_ramp_to_value_at_time(1.0, 1.0);
        let mut block = vec![0.0f32; 100];
        p.fill(0.5, 1000.0, &mut block);
        assert!((block[0] - p.value_at(0.5)).abs() < 1e-6);
        assert!(p.pending_events() <= 2);
        assert!((p.value_at(0.75) - (0.25 + 0.75 * (0.749 / 0.999))).abs() < 1e-3);
    }
}
