//! Stagelight Core - audio features and the fixture animation engine
//!
//! This crate contains everything that runs inside the frame loop:
//! - Effect interpolation primitive
//! - Audio feature extraction (smoothing, onset/beat, pitch, idle/dead timers)
//! - Fixture profiles, the per-fixture state machine and mapping engine
//! - The frame scheduler that drives tasks once per tick
//! - Engine and logging configuration

#![warn(missing_docs)]

use thiserror::Error;

pub mod audio;
pub mod clock;
pub mod config;
pub mod effect;
pub mod fixture;
pub mod frame;
pub mod logging;
pub mod monitor;
pub mod scheduler;

// --- Re-exports grouped by category ---

// Time & effects
pub use clock::{Clock, ManualClock, SystemClock};
pub use effect::{Effect, Value};

// Frame & events
pub use frame::{Frame, StateMap};
pub use monitor::{MonitorEvent, MonitorOp, MonitorQueue, OpState};

// Fixtures
pub use fixture::{
    Animatable, Fixture, FixtureOptions, FixtureProfile, LinkConfig, MappingDirective, Trigger,
};

// Audio
pub use audio::{AudioFeatureExtractor, CaptureSource, CaptureTask};

// Scheduling
pub use scheduler::{EngineContext, FixtureTask, FpsCounter, FrameScheduler, Task};

// Configuration
pub use config::{EngineConfig, OutputConfig};
pub use logging::LogConfig;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration could not be parsed or failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fixture type or mapping is not known to the engine
    #[error("Unknown {kind}: {name}")]
    Unknown {
        /// What was being looked up (fixture type, mapping function, ...)
        kind: &'static str,
        /// The offending name
        name: String,
    },

    /// Audio capture failure
    #[error("Capture error: {0}")]
    Capture(String),

    /// A task failed while running a tick
    #[error("Task {task} failed: {message}")]
    Task {
        /// Task name
        task: String,
        /// Error description
        message: String,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
