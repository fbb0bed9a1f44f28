//! Procedural entrainment sessions: binaural carriers that follow a beat
//! envelope, with noise, isochronic pulses, spatial motion, ambient beds and
//! timed narration mixed on one output graph.

pub mod ambient;
pub mod analyser;
pub mod assets;
pub mod audio_io;
pub mod automation;
pub mod clock;
pub mod command;
pub mod config;
pub mod decode;
pub mod dsp;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod guidance;
pub mod layer;
pub mod loader;
pub mod models;
pub mod narration;
pub mod noise_bed;
pub mod orchestrator;
pub mod phase;
pub mod pulse;
pub mod runtime;
pub mod spatial;
pub mod task;
pub mod tone;
pub mod voices;

pub use command::{Command, Visibility};
pub use error::{AssetError, SessionError};
pub use models::SessionConfig;
pub use orchestrator::{Orchestrator, StartOptions, TickState, TransportHooks};
pub use phase::SessionPhase;
pub use runtime::{SessionHandle, TickCadence};
