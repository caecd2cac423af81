//! Stagelight Control - everything that talks to the outside world
//!
//! This crate provides the frame-loop tasks that move data in and out of
//! the engine:
//! - **Control server**: line-delimited JSON over TCP for remote control
//!   and monitoring
//! - **DMX**: universe assembly and Art-Net output with reconnect cooldown
//! - **LED strips**: spectrum visualizer streamed as UDP pixel deltas
//!
//! ## Modules
//!
//! - [`server`] - TCP control protocol
//! - [`dmx`] - DMX output
//! - [`led`] - Networked LED strips
//! - [`error`] - Error types

#![warn(missing_docs)]

/// Error types
pub mod error;

/// DMX output (Art-Net, dry-run sink)
pub mod dmx;

/// Networked LED strips
pub mod led;

/// TCP control server
pub mod server;

// Re-exports
pub use dmx::{ArtNetSender, DeviceSink, DmxOutput, NullSink};
pub use error::{ControlError, Result};
pub use led::{RemoteStrip, ScrollVisualizer};
pub use server::{ControlServer, Envelope, ErrorCode, NetworkTask};
