use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::command::{Command, Visibility};
use crate::error::SessionError;
use crate::models::SessionConfig;
use crate::orchestrator::{Orchestrator, StartOptions, TickState};

/// Snapshots kept for a slow reader before new ones are dropped.
const TICK_BACKLOG: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct TickCadence {
    pub visible: Duration,
    pub hidden: Duration,
}

impl TickCadence {
    pub fn from_millis(visible_ms: u64, hidden_ms: u64) -> Self {
        Self {
            visible: Duration::from_millis(visible_ms.max(1)),
            hidden: Duration::from_millis(hidden_ms.max(1)),
        }
    }

    fn interval(&self, visibility: Visibility) -> Duration {
        match visibility {
            Visibility::Visible => self.visible,
            Visibility::Hidden => self.hidden,
        }
    }
}

/// Runs an [`Orchestrator`] on its own control thread and talks to it
/// over a channel. Dropping the handle shuts the thread down.
pub struct SessionHandle {
    tx: Sender<Command>,
    ticks: Receiver<TickState>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// `factory` runs on the control thread, so the orchestrator (and its
    /// output device) never has to cross threads.
    pub fn spawn<F>(factory: F, cadence: TickCadence) -> Result<Self, SessionError>
    where
        F: FnOnce() -> Result<Orchestrator, SessionError> + Send + 'static,
    {
        let (tx, rx) = unbounded::<Command>();
        let (tick_tx, ticks) = bounded::<TickState>(TICK_BACKLOG);
        let (ready_tx, ready_rx) = bounded::<Result<(), SessionError>>(1);
        let thread = std::thread::Builder::new()
            .name("session-control".into())
            .spawn(move || {
                let orchestrator = match factory() {
                    Ok(o) => {
                        let _ = ready_tx.send(Ok(()));
                        o
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                control_loop(orchestrator, rx, tick_tx, cadence);
            })
            .map_err(|e| SessionError::Output(e.to_string()))?;
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx,
                ticks,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(SessionError::Disconnected),
        }
    }

    /// Starts a session and waits for the output to open.
    pub fn start(&self, config: SessionConfig, options: StartOptions) -> Result<(), SessionError> {
        let (reply, result) = bounded(1);
        self.send(Command::Start {
            config: Box::new(config),
            options,
            reply,
        })?;
        result.recv().map_err(|_| SessionError::Disconnected)?
    }

    pub fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Disconnected)
    }

    pub fn set_visibility(&self, visibility: Visibility) -> Result<(), SessionError> {
        self.send(Command::SetVisibility(visibility))
    }

    /// Tick snapshots, oldest first.
    pub fn ticks(&self) -> &Receiver<TickState> {
        &self.ticks
    }

    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Command::Shutdown);
            if thread.join().is_err() {
                log::error!(target: "session::runtime", "control thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn control_loop(
    mut orchestrator: Orchestrator,
    rx: Receiver<Command>,
    tick_tx: Sender<TickState>,
    cadence: TickCadence,
) {
    let mut visibility = Visibility::Visible;
    let mut next_tick = Instant::now();
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Command::SetVisibility(v)) => {
                if v != visibility {
                    log::debug!(target: "session::runtime", "visibility {v:?}");
                    visibility = v;
                    next_tick = Instant::now();
                }
            }
            Ok(command) => apply(&mut orchestrator, command, &tick_tx),
            Err(RecvTimeoutError::Timeout) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| orchestrator.tick()));
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::error!(target: "session::runtime", "tick failed: {e}"),
                    Err(_) => log::error!(target: "session::runtime", "tick panicked"),
                }
                next_tick = Instant::now() + cadence.interval(visibility);
            }
        }
    }
    orchestrator.stop();
    log::debug!(target: "session::runtime", "control thread exiting");
}

fn apply(orchestrator: &mut Orchestrator, command: Command, tick_tx: &Sender<TickState>) {
    match command {
        Command::Start { config, options, reply } => {
            let sink = tick_tx.clone();
            let on_tick = Box::new(move |state: &TickState| {
                let _ = sink.try_send(state.clone());
            });
            let result = orchestrator.start(*config, options, on_tick);
            if let Err(e) = &result {
                log::error!(target: "session::runtime", "start failed: {e}");
            }
            let _ = reply.send(result);
        }
        Command::Pause => orchestrator.pause(),
        Command::Resume => orchestrator.resume(),
        Command::Seek(t) => {
            orchestrator.seek(t);
        }
        Command::Stop => orchestrator.stop(),
        Command::SetVolume(v) => orchestrator.set_volume(v),
        Command::SetAmbientVolume(v) => orchestrator.set_ambient_volume(v),
        Command::SetAmbientSound(id) => orchestrator.set_ambient_sound(&id),
        Command::ToggleIsochronic => {
            let on = orchestrator.toggle_isochronic();
            log::info!(target: "session::runtime", "isochronic {}", if on { "on" } else { "off" });
        }
        Command::SetVisibility(_) | Command::Shutdown => {}
    }
}
