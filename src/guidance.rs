use crate::models::{AmbientEvent, CarrierGainEvent, GuidancePhase, ResonantToneWindow, SamWindow};

pub trait Timed {
    fn time(&self) -> f64;
}

impl Timed for CarrierGainEvent {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Timed for AmbientEvent {
    fn time(&self) -> f64 {
        self.time
    }
}

/// One-shot events consumed in time order.
#[derive(Debug, Clone)]
pub struct EventCursor<T> {
    events: Vec<T>,
    next: usize,
}

impl<T: Timed + Clone> EventCursor<T> {
    pub fn new(events: &[T]) -> Self {
        let mut events = events.to_vec();
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        Self { events, next: 0 }
    }

    /// Events reached since the last call.
    pub fn due(&mut self, t: f64) -> &[T] {
        let start = self.next;
        while self.next < self.events.len() && self.events[self.next].time() <= t {
            self.next += 1;
        }
        &self.events[start..self.next]
    }

    /// Relocates to `t` and returns every event strictly before it, oldest
    /// first, so the caller can apply their end states at once.
    pub fn seek(&mut self, t: f64) -> &[T] {
        self.next = self.events.partition_point(|e| e.time() < t);
        &self.events[..self.next]
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Name of the latest-listed phase covering `t`; phases may overlap.
pub fn phase_name_at(phases: &[GuidancePhase], t: f64) -> Option<&str> {
    phases
        .iter()
        .rev()
        .find(|p| p.start_time <= t && t < p.end_time)
        .map(|p| p.name.as_str())
}

pub fn active_window(windows: &[SamWindow], t: f64) -> Option<&SamWindow> {
    windows.iter().rev().find(|w| w.start_time <= t && t < w.end_time)
}

pub fn resonant_active(window: &ResonantToneWindow, t: f64) -> bool {
    window.start_time <= t && t < window.end_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpatialMode;

    fn phase(name: &str, start: f64, end: f64) -> GuidancePhase {
        GuidancePhase {
            name: name.to_string(),
            start_time: start,
            end_time: end,
        }
    }

    fn fade(time: f64, volume: f32) -> AmbientEvent {
        AmbientEvent {
            time,
            volume,
            fade_seconds: 2.0,
        }
    }

    #[test]
    fn overlapping_phases_prefer_the_later_entry() {
        let phases = vec![phase("settle", 0.0, 120.0), phase("breath", 60.0, 90.0)];
        assert_eq!(phase_name_at(&phases, 30.0), Some("settle"));
        assert_eq!(phase_name_at(&phases, 75.0), Some("breath"));
        assert_eq!(phase_name_at(&phases, 90.0), Some("settle"));
        assert_eq!(phase_name_at(&phases, 500.0), None);
    }

    #[test]
    fn events_fire_once_in_order() {
        let mut cursor = EventCursor::new(&[fade(20.0, 0.2), fade(10.0, 0.5)]);
        assert!(cursor.due(5.0).is_empty());
        let first: Vec<f32> = cursor.due(15.0).iter().map(|e| e.volume).collect();
        assert_eq!(first, vec![0.5]);
        assert!(cursor.due(15.0).is_empty());
        assert_eq!(cursor.due(25.0).len(), 1);
        assert!(cursor.due(100.0).is_empty());
    }

    #[test]
    fn seek_returns_passed_events() {
        let mut cursor = EventCursor::new(&[fade(10.0, 0.5), fade(20.0, 0.2), fade(30.0, 0.9)]);
        let passed: Vec<f32> = cursor.seek(25.0).iter().map(|e| e.volume).collect();
        assert_eq!(passed, vec![0.5, 0.2]);
        assert_eq!(cursor.due(30.0).len(), 1);
        assert_eq!(cursor.seek(5.0).len(), 0);
        assert_eq!(cursor.due(10.0).len(), 1);
    }

    #[test]
    fn window_lookup() {
        let windows = vec![SamWindow {
            start_time: 10.0,
            end_time: 20.0,
            rotation_hz: 0.5,
            mode: SpatialMode::Smooth,
        }];
        assert!(active_window(&windows, 9.9).is_none());
        assert!(active_window(&windows, 10.0).is_some());
        assert!(active_window(&windows, 20.0).is_none());
    }
}
