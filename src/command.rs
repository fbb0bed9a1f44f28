use crossbeam::channel::Sender;

use crate::error::SessionError;
use crate::models::SessionConfig;
use crate::orchestrator::StartOptions;

/// Host visibility; decides how often the control loop ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug)]
pub enum Command {
    Start {
        config: Box<SessionConfig>,
        options: StartOptions,
        reply: Sender<Result<(), SessionError>>,
    },
    Pause,
    Resume,
    Seek(f64),
    Stop,
    SetVolume(f32),
    SetAmbientVolume(f32),
    SetAmbientSound(String),
    ToggleIsochronic,
    SetVisibility(Visibility),
    /// Stops the session and ends the control thread.
    Shutdown,
}
