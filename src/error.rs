//! Error types for the broadcast engine.
//!
//! Only failures a caller can act on are surfaced here. Probe failures, pipe
//! breaks between pipeline stages and per-listener write failures are handled
//! inside the engine and only show up in the logs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The requested source asset does not exist in the audio directory.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// No file in the effects directory matches the requested name.
    #[error("effect not found: {0}")]
    EffectNotFound(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    /// An effect is already being mixed in; injections are not queued.
    #[error("an effect is already mixing")]
    AlreadyMixing,

    /// The mixing utility could not be started.
    #[error("mix failed: {0}")]
    Mix(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
