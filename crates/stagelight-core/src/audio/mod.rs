//! Audio feature extraction
//!
//! Raw PCM blocks come from a [`CaptureSource`] via [`CaptureTask`]; the
//! [`AudioFeatureExtractor`] task turns each block into the frame's audio
//! fields (smoothed Mel spectrum, onset/beat flags, pitch, idle/dead timers).

use serde::{Deserialize, Serialize};

pub mod beat;
pub mod capture;
pub mod dsp;
pub mod extractor;
pub mod idle;
pub mod pitch;
pub mod smoothing;

pub use capture::{BlockSender, CaptureSource, CaptureTask, ThreadCapture};
pub use extractor::AudioFeatureExtractor;

/// Numeric parameters shared by every audio stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Capture sample rate in Hz
    pub mic_rate: u32,
    /// Frame loop rate; one capture block per frame
    pub fps: u32,
    /// Number of Mel bins in the smoothed spectrum
    pub n_fft_bins: usize,
    /// Number of past blocks concatenated before the FFT
    pub n_rolling_history: usize,
    /// Below this peak level the spectrum is reported as silence
    pub min_volume_threshold: f32,
    /// Lowest Mel filter edge (Hz)
    pub min_frequency: f32,
    /// Highest Mel filter edge (Hz)
    pub max_frequency: f32,
    /// Spectrum mean below which audio counts as idle
    pub idle_threshold: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            mic_rate: 44100,
            fps: 60,
            n_fft_bins: 24,
            n_rolling_history: 2,
            min_volume_threshold: 1e-7,
            min_frequency: 15.0,
            max_frequency: 20000.0,
            idle_threshold: 0.05,
        }
    }
}

impl AudioSettings {
    /// PCM samples in one capture block
    pub fn samples_per_frame(&self) -> usize {
        (self.mic_rate / self.fps.max(1)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_frame() {
        assert_eq!(AudioSettings::default().samples_per_frame(), 735);
        let settings = AudioSettings {
            mic_rate: 48000,
            fps: 30,
            ..Default::default()
        };
        assert_eq!(settings.samples_per_frame(), 1600);
    }
}
