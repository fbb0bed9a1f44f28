use crate::automation::AudioParam;
use crate::graph::{Destination, NodeId};
use crate::layer::{AudioLayer, LayerLevel};
use crate::task::ScheduledTask;
use crate::voices::PulsedToneVoice;

/// One gate automation point. `ramp` means a linear ramp ending here;
/// otherwise the gain steps to `gain` at `time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseBreakpoint {
    pub time: f64,
    pub gain: f32,
    pub ramp: bool,
}

/// Trapezoid cycles starting at `start` at `beat_hz`, for every cycle that
/// begins before `until`. Returns the breakpoints and the start of the
/// first cycle not emitted.
pub fn compute_pulse_batch(start: f64, until: f64, beat_hz: f64, ramp: f64) -> (Vec<PulseBreakpoint>, f64) {
    let mut points = Vec::new();
    if beat_hz <= 0.0 || !beat_hz.is_finite() {
        return (points, until.max(start));
    }
    let period = 1.0 / beat_hz;
    let half = period / 2.0;
    // very fast gates get shorter edges rather than overlapping ones
    let edge = ramp.min(half / 2.0);
    let mut k = 0u64;
    let mut t = start;
    while t < until {
        points.push(PulseBreakpoint { time: t, gain: 0.0, ramp: false });
        points.push(PulseBreakpoint { time: t + edge, gain: 1.0, ramp: true });
        points.push(PulseBreakpoint { time: t + half - edge, gain: 1.0, ramp: false });
        points.push(PulseBreakpoint { time: t + half, gain: 0.0, ramp: true });
        k += 1;
        t = start + k as f64 * period;
    }
    (points, t)
}

#[derive(Debug, Clone, Copy)]
pub struct PulseTiming {
    pub interval: f64,
    pub lookahead: f64,
    pub resync: f64,
    pub ramp: f64,
}

/// Isochronic layer: a centred tone whose gate is written ahead of time in
/// batches, so a slow or suspended control thread never starves it.
pub struct PulseScheduler {
    dest: Destination,
    tone_hz: f64,
    beat_hz: f64,
    gate: AudioParam,
    level: LayerLevel,
    timing: PulseTiming,
    last_scheduled: f64,
    task: ScheduledTask,
    node: Option<NodeId>,
}

impl PulseScheduler {
    pub fn new(dest: Destination, tone_hz: f64, beat_hz: f64, volume: f32, timing: PulseTiming) -> Self {
        Self {
            dest,
            tone_hz,
            beat_hz,
            gate: AudioParam::new(0.0),
            level: LayerLevel::new(volume),
            timing,
            last_scheduled: 0.0,
            task: ScheduledTask::new(),
            node: None,
        }
    }

    /// Takes effect from the next batch.
    pub fn set_beat_frequency(&mut self, hz: f64) {
        self.beat_hz = hz;
    }

    pub fn beat_frequency(&self) -> f64 {
        self.beat_hz
    }

    pub fn gate(&self) -> &AudioParam {
        &self.gate
    }

    pub fn last_scheduled(&self) -> f64 {
        self.last_scheduled
    }

    /// Writes the next batch. A cursor that fell too far behind (suspended
    /// host) restarts at `now` instead of replaying stale pulses.
    pub fn schedule(&mut self, now: f64) {
        let cursor = if self.last_scheduled < now - self.timing.resync {
            now
        } else {
            self.last_scheduled.max(now)
        };
        self.gate.cancel_scheduled_values(cursor);
        let (points, next) = compute_pulse_batch(cursor, now + self.timing.lookahead, self.beat_hz, self.timing.ramp);
        for p in &points {
            if p.ramp {
                self.gate.linear_ramp_to_value_at_time(p.gain, p.time);
            } else {
                self.gate.set_value_at_time(p.gain, p.time);
            }
        }
        self.last_scheduled = next;
    }
}

impl AudioLayer for PulseScheduler {
    fn start(&mut self, now: f64) {
        self.level.silence();
        if self.node.is_none() {
            let voice = PulsedToneVoice::new(self.tone_hz, self.gate.clone(), self.level.param());
            self.node = Some(self.dest.connect(Box::new(voice)));
        }
        self.last_scheduled = now;
        self.schedule(now);
        self.task.arm(now + self.timing.interval);
    }

    fn stop(&mut self) {
        self.task.cancel();
        if let Some(node) = self.node.take() {
            self.dest.disconnect(node);
        }
        self.gate.set_value(0.0);
    }

    fn set_volume(&mut self, volume: f32, now: f64) {
        self.level.set_volume(volume, now);
    }

    fn fade_volume(&mut self, target: f32, seconds: f64, now: f64) {
        self.level.fade(target, seconds, now);
    }

    fn volume(&self) -> f32 {
        self.level.volume()
    }

    fn poll(&mut self, now: f64) {
        if self.task.take_if_due(now) {
            self.schedule(now);
            self.task.arm(now + self.timing.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OutputGraph;

    const TIMING: PulseTiming = PulseTiming {
        interval: 0.9,
        lookahead: 1.1,
        resync: 0.1,
        ramp: 0.002,
    };

    fn attacks_in(points: &[PulseBreakpoint], from: f64, to: f64) -> usize {
        points
            .iter()
            .filter(|p| !p.ramp && p.gain == 0.0 && p.time >= from && p.time < to)
            .count()
    }

    #[test]
    fn ten_seconds_hold_ten_times_f_cycles() {
        for &f in &[4.0, 7.83, 10.0, 40.0] {
            let mut all = Vec::new();
            let mut cursor: f64 = 0.0;
            let mut now = 0.0;
            while now < 12.0 {
                let (points, next) = compute_pulse_batch(cursor.max(now), now + 1.1, f, 0.002);
                all.extend(points);
                cursor = next;
                now += 0.9;
            }
            let cycles = attacks_in(&all, 1.0, 11.0) as f64;
            assert!((cycles - 10.0 * f).abs() <= 1.0, "f={f} cycles={cycles}");
        }
    }

    #[test]
    fn edges_last_two_milliseconds() {
        let (points, _) = compute_pulse_batch(0.0, 1.0, 10.0, 0.002);
        for cycle in points.chunks(4) {
            assert!((cycle[1].time - cycle[0].time - 0.002).abs() < 1e-9);
            assert!((cycle[3].time - cycle[2].time - 0.002).abs() < 1e-9);
            assert!((cycle[3].time - cycle[0].time - 0.05).abs() < 1e-9);
        }
    }

    #[test]
    fn batches_tile_without_gaps() {
        let (_, next) = compute_pulse_batch(0.0, 1.1, 10.0, 0.002);
        assert!(next >= 1.1 - 1e-9 && next <= 1.2 + 1e-9);
        let (points, _) = compute_pulse_batch(next, 2.0, 10.0, 0.002);
        assert!((points[0].time - next).abs() < 1e-12);
    }

    #[test]
    fn stale_cursor_resyncs_to_now() {
        let graph = OutputGraph::new(1000);
        let mut pulse = PulseScheduler::new(graph.destination(), 200.0, 10.0, 1.0, TIMING);
        pulse.start(0.0);
        let first = pulse.last_scheduled();
        assert!(first >= 1.1 - 1e-9);
        // host slept for five seconds
        pulse.schedule(6.0);
        let bps = pulse.gate().breakpoints(6.0, 6.0 + 1e-9);
        assert_eq!(bps, vec![(6.0, 0.0)]);
        assert!(pulse.gate().breakpoints(1.2, 5.9).is_empty());
    }

    #[test]
    fn recent_cursor_continues_where_it_left_off() {
        let graph = OutputGraph::new(1000);
        let mut pulse = PulseScheduler::new(graph.destination(), 200.0, 10.0, 1.0, TIMING);
        pulse.start(0.0);
        let cursor = pulse.last_scheduled();
        pulse.poll(0.9);
        let starts = pulse.gate().breakpoints(cursor, cursor + 1e-9);
        assert_eq!(starts, vec![(cursor, 0.0)]);
        // the earlier batch survives untouched
        assert!(!pulse.gate().breakpoints(0.5, 0.6).is_empty());
    }

    #[test]
    fn stop_cancels_the_task() {
        let graph = OutputGraph::new(1000);
        let dest = graph.destination();
        let mut pulse = PulseScheduler::new(dest.clone(), 200.0, 10.0, 1.0, TIMING);
        pulse.start(0.0);
        pulse.stop();
        pulse.stop();
        assert_eq!(dest.voice_count(), 0);
        let before = pulse.last_scheduled();
        pulse.poll(5.0);
        assert_eq!(pulse.last_scheduled(), before);
    }
}
