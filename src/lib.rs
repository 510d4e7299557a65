//! Single-station live audio broadcaster.
//!
//! One source is paced to real time and fanned out to every connected
//! listener; an effect can be mixed in on demand through SoX without
//! interrupting playback. `Session` is the entry point.

pub mod broadcaster;
pub mod config;
pub mod effects;
pub mod error;
pub mod listeners;
pub mod pacer;
pub mod prober;
pub mod server;
pub mod session;
pub mod source;
pub mod tool;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use listeners::{ListenerChannel, ListenerFrame};
pub use pacer::PlaybackRate;
pub use session::{PipelineState, Session, SessionStatus};
pub use tool::{AudioTool, MixProcess, SoxTool};
