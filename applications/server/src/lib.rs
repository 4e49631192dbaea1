//! Aria Server Library
//!
//! Voice-controlled local music playback orchestration for a smart speaker:
//! ASR events in, playback commands and short-lived file URLs out.
//!
//! This library exposes the core components for testing purposes.

pub mod cli;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod orchestrator;
pub mod probe;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use device::{DeviceControl, ShellDevice};
pub use dispatcher::EventDispatcher;
pub use error::{DeviceError, Result, ServerError};
pub use gateway::FileGateway;
pub use intent::{Intent, IntentParser};
pub use orchestrator::{Orchestrator, OrchestratorSettings, PlaybackStatus, SongItem};
pub use probe::{DurationProbe, TrackProber};
