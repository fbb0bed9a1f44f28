use thiserror::Error;

/// Failures that reach the caller of a session operation.
///
/// Only output creation is fatal during `start`; every other layer failure
/// is absorbed by the engine that owns it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unable to open audio output: {0}")]
    Output(String),
    #[error("invalid session configuration: {0}")]
    Config(String),
    #[error("session control thread is gone")]
    Disconnected,
    #[error("failed to parse session: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("i/o error reading {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid data url")]
    DataUrl(#[from] base64::DecodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("asset loader shut down")]
    LoaderClosed,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no default track")]
    NoTrack,
    #[error("unknown sample rate")]
    UnknownSampleRate,
    #[error("decoded stream is empty")]
    Empty,
    #[error(transparent)]
    Symphonia(#[from] symphonia::core::errors::Error),
}
