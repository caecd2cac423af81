//! Pitch stage: confident estimates averaged over a short buffer

use std::collections::VecDeque;

use super::dsp::{AutocorrelationPitch, PitchDetector};
use super::AudioSettings;

/// Number of confident estimates averaged into one published pitch
pub const PITCH_BUFFER_LEN: usize = 3;

/// Buffers confident pitch estimates and publishes their mean once full
pub struct PitchStage {
    detector: Box<dyn PitchDetector>,
    buffer: VecDeque<f32>,
}

impl PitchStage {
    /// Stage using the built-in autocorrelation estimator
    pub fn new(settings: &AudioSettings) -> Self {
        Self::with_detector(Box::new(AutocorrelationPitch::new(settings.mic_rate)))
    }

    /// Stage with a custom estimator
    pub fn with_detector(detector: Box<dyn PitchDetector>) -> Self {
        Self {
            detector,
            buffer: VecDeque::with_capacity(PITCH_BUFFER_LEN),
        }
    }

    /// Feed one normalized block.
    ///
    /// Estimates with zero confidence are discarded. Returns the mean of
    /// the last [`PITCH_BUFFER_LEN`] accepted estimates, or `None` until
    /// that many have been seen.
    pub fn process(&mut self, block: &[f32]) -> Option<f32> {
        let (pitch, confidence) = self.detector.detect(block);
        if confidence != 0.0 {
            if self.buffer.len() == PITCH_BUFFER_LEN {
                self.buffer.pop_front();
            }
            self.buffer.push_back(pitch);
        }

        if self.buffer.len() < PITCH_BUFFER_LEN {
            return None;
        }
        Some(self.buffer.iter().sum::<f32>() / PITCH_BUFFER_LEN as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(VecDeque<(f32, f32)>);

    impl PitchDetector for Scripted {
        fn detect(&mut self, _block: &[f32]) -> (f32, f32) {
            self.0.pop_front().unwrap_or((0.0, 0.0))
        }
    }

    #[test]
    fn test_publishes_mean_once_buffer_full() {
        let script = vec![(60.0, 0.9), (0.0, 0.0), (62.0, 0.8), (64.0, 0.7), (72.0, 0.9)];
        let mut stage = PitchStage::with_detector(Box::new(Scripted(script.into())));

        assert_eq!(stage.process(&[]), None);
        assert_eq!(stage.process(&[]), None);
        assert_eq!(stage.process(&[]), None);
        assert_eq!(stage.process(&[]), Some(62.0));
        assert_eq!(stage.process(&[]), Some((62.0 + 64.0 + 72.0) / 3.0));
    }

    #[test]
    fn test_zero_confidence_never_fills_buffer() {
        let script = vec![(60.0, 0.0); 10];
        let mut stage = PitchStage::with_detector(Box::new(Scripted(script.into())));
        for _ in 0..10 {
            assert_eq!(stage.process(&[]), None);
        }
    }
}
