//! Per-tick blackboard shared by every task in the frame loop

use std::collections::{BTreeMap, HashMap};

/// Property name to channel value (0-255)
pub type StateMap = BTreeMap<String, u8>;

/// Everything produced and consumed during one tick.
///
/// A fresh `Frame` is built at the start of every loop iteration and
/// dropped at the end of it; absent features are `None`.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Time the tick started, in clock seconds
    pub now: f64,
    /// Raw PCM block popped from the capture queue this tick
    pub raw_audio: Option<Vec<i16>>,
    /// Smoothed Mel spectrum (one value per bin)
    pub audio: Option<Vec<f32>>,
    /// An onset was detected in this tick's block
    pub is_onset: Option<bool>,
    /// A tempo pulse was detected in this tick's block
    pub is_beat: Option<bool>,
    /// Averaged pitch (MIDI note number) once enough confident samples are buffered
    pub pitch: Option<f32>,
    /// Seconds the spectrum average has been below the idle threshold
    pub idle_for: Option<f64>,
    /// Seconds the spectrum has been exactly silent
    pub dead_for: Option<f64>,
    /// Sum of the smoothed spectrum
    pub audio_v_sum: Option<f32>,
    /// Mean of the smoothed spectrum
    pub audio_v_avg: Option<f32>,
    /// Deferred DMX channel writes (absolute channel, 1-based)
    pub dmx: BTreeMap<u16, u8>,
    /// DMX channel writes that must be rendered immediately
    pub dmx_force: BTreeMap<u16, u8>,
    /// LED strip pixel buffers keyed by strip name
    pub pixels: HashMap<String, Vec<[u8; 3]>>,
    /// Linked fixture states, keyed by the receiving fixture's name
    pub pushed_states: HashMap<String, StateMap>,
}

impl Frame {
    /// Empty frame for a tick starting at `now`
    pub fn new(now: f64) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    /// Merge channel writes into the deferred or the immediate buffer
    pub fn write_channels(&mut self, channels: impl IntoIterator<Item = (u16, u8)>, force: bool) {
        let target = if force {
            &mut self.dmx_force
        } else {
            &mut self.dmx
        };
        target.extend(channels);
    }
}
