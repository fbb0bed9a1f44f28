use serde::Serialize;

use crate::models::FrequencyPoint;

/// Coarse session phase. `Idle` and `Starting` only exist at the
/// orchestrator level; the tracker below never yields them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Starting,
    Induction,
    Main,
    Return,
    Complete,
}

impl SessionPhase {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionPhase::Induction | SessionPhase::Main | SessionPhase::Return
        )
    }
}

/// Derives the phase from elapsed time and the envelope's keyframes.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    induction_end: f64,
    return_start: Option<f64>,
    duration: f64,
    current: SessionPhase,
}

impl PhaseTracker {
    pub fn new(envelope: &[FrequencyPoint], duration: f64, has_return_phase: bool) -> Self {
        let induction_end = envelope.get(1).map(|p| p.time).unwrap_or(0.0);
        let return_start = has_return_phase.then(|| {
            if envelope.len() >= 3 {
                envelope[envelope.len() - 2].time
            } else {
                0.85 * duration
            }
        });
        Self {
            induction_end,
            return_start,
            duration,
            current: SessionPhase::Induction,
        }
    }

    /// Phase for `t`, ignoring the terminal latch.
    pub fn phase_at(&self, t: f64) -> SessionPhase {
        if t >= self.duration {
            SessionPhase::Complete
        } else if t < self.induction_end {
            SessionPhase::Induction
        } else if self.return_start.is_some_and(|start| t > start) {
            SessionPhase::Return
        } else {
            SessionPhase::Main
        }
    }

    /// Advances the tracked phase. Once `Complete`, stays there until `reset`.
    pub fn update(&mut self, t: f64) -> SessionPhase {
        if self.current != SessionPhase::Complete {
            self.current = self.phase_at(t);
        }
        self.current
    }

    pub fn complete(&mut self) {
        self.current = SessionPhase::Complete;
    }

    pub fn reset(&mut self) {
        self.current = SessionPhase::Induction;
    }

    pub fn current(&self) -> SessionPhase {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(points: &[(f64, f64)]) -> Vec<FrequencyPoint> {
        points.iter().map(|&(t, f)| FrequencyPoint::new(t, f)).collect()
    }

    #[test]
    fn phases_progress_in_order_without_revisits() {
        let e = env(&[(0.0, 10.0), (60.0, 10.0), (120.0, 6.0), (180.0, 6.0)]);
        let mut tracker = PhaseTracker::new(&e, 240.0, true);
        let mut seen: Vec<SessionPhase> = Vec::new();
        let mut t = 0.0;
        while t <= 250.0 {
            let p = tracker.update(t);
            if seen.last() != Some(&p) {
                seen.push(p);
            }
            t += 0.5;
        }
        assert_eq!(
            seen,
            vec![
                SessionPhase::Induction,
                SessionPhase::Main,
                SessionPhase::Return,
                SessionPhase::Complete
            ]
        );
    }

    #[test]
    fn no_return_phase_skips_return() {
        let e = env(&[(0.0, 10.0), (60.0, 10.0), (120.0, 6.0)]);
        let tracker = PhaseTracker::new(&e, 180.0, false);
        assert_eq!(tracker.phase_at(170.0), SessionPhase::Main);
    }

    #[test]
    fn short_envelope_uses_duration_fraction() {
        let e = env(&[(0.0, 10.0), (30.0, 6.0)]);
        let tracker = PhaseTracker::new(&e, 100.0, true);
        assert_eq!(tracker.phase_at(10.0), SessionPhase::Induction);
        assert_eq!(tracker.phase_at(85.0), SessionPhase::Main);
        assert_eq!(tracker.phase_at(85.5), SessionPhase::Return);
    }

    #[test]
    fn complete_latches_until_reset() {
        let e = env(&[(0.0, 10.0), (60.0, 8.0)]);
        let mut tracker = PhaseTracker::new(&e, 120.0, false);
        assert_eq!(tracker.update(130.0), SessionPhase::Complete);
        assert_eq!(tracker.update(10.0), SessionPhase::Complete);
        tracker.reset();
        assert_eq!(tracker.update(10.0), SessionPhase::Induction);
    }

    #[test]
    fn scenario_midpoint_is_main() {
        let e = env(&[(0.0, 10.0), (60.0, 10.0), (120.0, 6.0), (180.0, 6.0)]);
        let tracker = PhaseTracker::new(&e, 180.0, false);
        assert_eq!(tracker.phase_at(90.0), SessionPhase::Main);
        assert_eq!(tracker.phase_at(30.0), SessionPhase::Induction);
    }
}
