//! DMX output
//!
//! Fixtures write channel values into the frame; [`DmxOutput`] merges them
//! into a 512-channel universe and hands it to a [`DeviceSink`] at most
//! `fps` times per second. Writes flagged as immediate bypass the rate
//! limit. While the device is unreachable, opening is retried at most once
//! per [`RECONNECT_COOLDOWN`] and fixtures keep animating.

pub mod artnet;

pub use artnet::ArtNetSender;

use stagelight_core::config::DmxConfig;
use stagelight_core::{EngineContext, Task};
use tracing::{debug, error, info, warn};

use crate::Result;

/// Channels in one DMX universe
pub const UNIVERSE_SIZE: usize = 512;

/// Seconds between attempts to open an unreachable device
pub const RECONNECT_COOLDOWN: f64 = 1.0;

/// A DMX transport
pub trait DeviceSink: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Send the whole universe
    fn render(&mut self, universe: &[u8; UNIVERSE_SIZE]) -> Result<()>;
}

/// Dry-run sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink {
    renders: u64,
}

impl NullSink {
    /// Number of universes discarded so far
    pub fn renders(&self) -> u64 {
        self.renders
    }
}

impl DeviceSink for NullSink {
    fn name(&self) -> &str {
        "sink"
    }

    fn render(&mut self, _universe: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        self.renders += 1;
        Ok(())
    }
}

/// Opens (or reopens) the device
pub type SinkOpener = Box<dyn FnMut() -> Result<Box<dyn DeviceSink>> + Send>;

/// Opener for a configured device
pub fn opener(config: &DmxConfig) -> SinkOpener {
    match config.clone() {
        DmxConfig::Artnet { target, universe } => Box::new(move || {
            let sender = ArtNetSender::new(universe, &target)?;
            Ok(Box::new(sender) as Box<dyn DeviceSink>)
        }),
        DmxConfig::Sink => Box::new(|| Ok(Box::new(NullSink::default()) as Box<dyn DeviceSink>)),
    }
}

/// Frame-loop task that renders fixture channels to the DMX device
pub struct DmxOutput {
    open: SinkOpener,
    sink: Option<Box<dyn DeviceSink>>,
    universe: [u8; UNIVERSE_SIZE],
    dirty: bool,
    min_interval: f64,
    last_render: Option<f64>,
    last_attempt: Option<f64>,
}

impl DmxOutput {
    /// Output rendering at most `fps` times per second
    pub fn new(open: SinkOpener, fps: u32) -> Self {
        Self {
            open,
            sink: None,
            universe: [0; UNIVERSE_SIZE],
            dirty: false,
            min_interval: 1.0 / f64::from(fps.max(1)),
            last_render: None,
            last_attempt: None,
        }
    }

    /// Output for a configured device
    pub fn from_config(config: &DmxConfig, fps: u32) -> Self {
        Self::new(opener(config), fps)
    }

    /// Current universe contents
    pub fn universe(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.universe
    }

    /// Whether a device is currently open
    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    fn merge(&mut self, channels: &std::collections::BTreeMap<u16, u8>) {
        for (&channel, &value) in channels {
            match usize::from(channel).checked_sub(1) {
                Some(index) if index < UNIVERSE_SIZE => {
                    if self.universe[index] != value {
                        self.universe[index] = value;
                        self.dirty = true;
                    }
                }
                _ => debug!("Dropping write to DMX channel {}", channel),
            }
        }
    }

    fn ensure_open(&mut self, now: f64) -> bool {
        if self.sink.is_some() {
            return true;
        }
        if self
            .last_attempt
            .is_some_and(|t| now - t < RECONNECT_COOLDOWN)
        {
            return false;
        }
        self.last_attempt = Some(now);
        match (self.open)() {
            Ok(sink) => {
                info!("DMX device {} opened", sink.name());
                self.sink = Some(sink);
                // Resend everything to the fresh device
                self.dirty = true;
                true
            }
            Err(e) => {
                warn!("Failed to open DMX device: {}", e);
                false
            }
        }
    }

    fn render(&mut self, now: f64) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.render(&self.universe) {
            Ok(()) => {
                self.dirty = false;
                self.last_render = Some(now);
            }
            Err(e) => {
                error!("DMX render to {} failed: {}", sink.name(), e);
                self.sink = None;
                self.last_attempt = Some(now);
            }
        }
    }
}

impl Task for DmxOutput {
    fn name(&self) -> &str {
        "dmx output"
    }

    fn start(&mut self, ctx: &mut EngineContext) -> stagelight_core::Result<()> {
        self.ensure_open(ctx.frame.now);
        Ok(())
    }

    fn run(&mut self, ctx: &mut EngineContext) -> stagelight_core::Result<()> {
        let now = ctx.frame.now;
        let forced = !ctx.frame.dmx_force.is_empty();
        self.merge(&ctx.frame.dmx);
        self.merge(&ctx.frame.dmx_force);

        if !self.ensure_open(now) {
            return Ok(());
        }

        let due = self
            .last_render
            .map_or(true, |t| now - t >= self.min_interval);
        if forced || (self.dirty && due) {
            self.render(now);
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut EngineContext) {
        if let Some(sink) = self.sink.take() {
            info!("Closing DMX device {}", sink.name());
        }
    }
}
