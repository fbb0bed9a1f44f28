/// A deadline owned by one engine. Nothing runs by itself: the owner polls
/// with [`ScheduledTask::take_if_due`] from its tick, so cancelling (or
/// dropping the owner) is all it takes to make sure the work never happens.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScheduledTask {
    due: Option<f64>,
}

impl ScheduledTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the task for graph time `at`.
    pub fn arm(&mut self, at: f64) {
        self.due = Some(at);
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    pub fn due(&self) -> Option<f64> {
        self.due
    }

    /// True exactly once when `now` reaches the deadline; disarms itself.
    pub fn take_if_due(&mut self, now: f64) -> bool {
        match self.due {
            Some(at) if now >= at => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}
