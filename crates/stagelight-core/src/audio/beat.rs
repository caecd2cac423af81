//! Onset/beat stage

use super::dsp::{EnergyOnset, HfcTempo, OnsetDetector, TempoDetector};
use super::AudioSettings;

/// Onset and tempo flags for the current block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeatReport {
    /// A transient occurred in this block
    pub is_onset: bool,
    /// A tempo pulse occurred in this block
    pub is_beat: bool,
}

/// Feeds each block to an onset detector and a tempo detector
pub struct BeatStage {
    onset: Box<dyn OnsetDetector>,
    tempo: Box<dyn TempoDetector>,
}

impl BeatStage {
    /// Stage using the built-in energy onset and HFC tempo detectors
    pub fn new(settings: &AudioSettings) -> Self {
        let block_len = settings.samples_per_frame();
        // Onset energy is averaged over roughly the last 0.7 s
        let history = (settings.fps as usize * 7 / 10).max(4);
        Self::with_detectors(
            Box::new(EnergyOnset::new(history)),
            Box::new(HfcTempo::new(block_len, settings.mic_rate)),
        )
    }

    /// Stage with custom detectors
    pub fn with_detectors(onset: Box<dyn OnsetDetector>, tempo: Box<dyn TempoDetector>) -> Self {
        Self { onset, tempo }
    }

    /// Run both detectors on one normalized block
    pub fn process(&mut self, block: &[f32]) -> BeatReport {
        BeatReport {
            is_onset: self.onset.detect(block),
            is_beat: self.tempo.detect(block),
        }
    }

    /// Current tempo estimate
    pub fn bpm(&self) -> Option<f32> {
        self.tempo.bpm()
    }
}
