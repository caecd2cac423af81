//! Smoothing stage: raw PCM to a gain-normalized, smoothed Mel spectrum

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::dsp::{gaussian_filter1d, ExpFilter, MelFilterbank};
use super::AudioSettings;

/// Rolling-window FFT with Mel projection, gain tracking and smoothing
pub struct SmoothingStage {
    samples_per_frame: usize,
    history: VecDeque<Vec<f32>>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    mel: MelFilterbank,
    gain: ExpFilter,
    smoothing: ExpFilter,
    min_volume: f32,
    n_bins: usize,
}

impl SmoothingStage {
    /// Stage sized from the audio settings
    pub fn new(settings: &AudioSettings) -> Self {
        let samples_per_frame = settings.samples_per_frame();
        let rolling = settings.n_rolling_history.max(1);
        let window_len = samples_per_frame * rolling;
        let padded = window_len.max(2).next_power_of_two();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(padded);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        // Hamming window over the whole rolling window
        let window = (0..window_len)
            .map(|n| {
                if window_len < 2 {
                    1.0
                } else {
                    0.54 - 0.46
                        * (2.0 * std::f32::consts::PI * n as f32 / (window_len - 1) as f32).cos()
                }
            })
            .collect();

        let mel = MelFilterbank::new(
            settings.n_fft_bins,
            window_len / 2,
            settings.mic_rate,
            settings.min_frequency,
            settings.max_frequency,
        );

        debug!(
            "Smoothing stage: {} samples/frame, {} rolling, FFT size {}, {} Mel bins",
            samples_per_frame, rolling, padded, settings.n_fft_bins
        );

        Self {
            samples_per_frame,
            history: (0..rolling).map(|_| vec![0.0; samples_per_frame]).collect(),
            window,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); padded],
            scratch,
            mel,
            gain: ExpFilter::new(vec![0.1], 0.01, 0.99),
            smoothing: ExpFilter::new(vec![0.1; settings.n_fft_bins], 0.5, 0.99),
            min_volume: settings.min_volume_threshold,
            n_bins: settings.n_fft_bins,
        }
    }

    /// Feed one normalized block and return the smoothed spectrum.
    ///
    /// Blocks are padded or truncated to the configured frame size. When
    /// the rolling window is below the volume threshold the spectrum is
    /// all zeros and the filters are left untouched.
    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        let mut samples = block.to_vec();
        samples.resize(self.samples_per_frame, 0.0);
        self.history.pop_front();
        self.history.push_back(samples);

        let volume = self
            .history
            .iter()
            .flatten()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        if volume < self.min_volume {
            return vec![0.0; self.n_bins];
        }

        let mut windowed = self.history.iter().flatten().zip(&self.window);
        for slot in self.buffer.iter_mut() {
            let re = windowed.next().map_or(0.0, |(s, w)| s * w);
            *slot = Complex::new(re, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let half = self.window.len() / 2;
        let magnitudes: Vec<f32> = self.buffer[..half].iter().map(|c| c.norm()).collect();

        let mut mel: Vec<f32> = self.mel.project(&magnitudes).into_iter().map(|m| m * m).collect();

        let peak = gaussian_filter1d(&mel, 1.0)
            .into_iter()
            .fold(0.0f32, f32::max);
        let gain = self.gain.update(&[peak])[0].max(f32::EPSILON);
        for m in &mut mel {
            *m /= gain;
        }
        self.smoothing.update(&mel).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AudioSettings {
        AudioSettings::default()
    }

    fn tone(len: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_silence_gives_zero_bins() {
        let mut stage = SmoothingStage::new(&settings());
        let out = stage.process(&vec![0.0; 735]);
        assert_eq!(out, vec![0.0; 24]);
    }

    #[test]
    fn test_tone_lights_up_matching_bins() {
        let mut stage = SmoothingStage::new(&settings());
        let mut out = Vec::new();
        for _ in 0..10 {
            out = stage.process(&tone(735, 1000.0, 44100.0));
        }
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|v| v.is_finite() && *v >= 0.0));
        let loudest = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        // 1 kHz sits in the lower half of a 15 Hz - 20 kHz Mel scale
        assert!(loudest > 2 && loudest < 16, "loudest bin {}", loudest);
    }

    #[test]
    fn test_short_blocks_are_padded() {
        let mut stage = SmoothingStage::new(&settings());
        let out = stage.process(&tone(100, 440.0, 44100.0));
        assert_eq!(out.len(), 24);
    }
}
