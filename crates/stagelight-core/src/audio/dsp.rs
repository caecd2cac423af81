//! DSP building blocks: filters, the Mel filterbank and the built-in
//! onset, tempo and pitch detectors
//!
//! The detectors sit behind small traits so the feature extractor does not
//! depend on any particular estimator.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Reports whether a block contains a transient
pub trait OnsetDetector: Send {
    /// Feed one normalized block (samples in [-1, 1])
    fn detect(&mut self, block: &[f32]) -> bool;
}

/// Reports whether a block falls on a tempo pulse
pub trait TempoDetector: Send {
    /// Feed one normalized block (samples in [-1, 1])
    fn detect(&mut self, block: &[f32]) -> bool;

    /// Current tempo estimate
    fn bpm(&self) -> Option<f32> {
        None
    }
}

/// Estimates the pitch of a block
pub trait PitchDetector: Send {
    /// Feed one normalized block; returns (MIDI note, confidence).
    /// A confidence of 0 means "no pitch".
    fn detect(&mut self, block: &[f32]) -> (f32, f32);
}

/// Asymmetric exponential smoothing: `rise` applies when the input is above
/// the current value, `decay` otherwise
#[derive(Debug, Clone)]
pub struct ExpFilter {
    value: Vec<f32>,
    decay: f32,
    rise: f32,
}

impl ExpFilter {
    /// Filter starting at `initial`
    pub fn new(initial: Vec<f32>, decay: f32, rise: f32) -> Self {
        Self {
            value: initial,
            decay,
            rise,
        }
    }

    /// Blend `input` into the filter and return the new value
    pub fn update(&mut self, input: &[f32]) -> &[f32] {
        for (current, v) in self.value.iter_mut().zip(input) {
            let alpha = if *v > *current { self.rise } else { self.decay };
            *current = alpha * v + (1.0 - alpha) * *current;
        }
        &self.value
    }

    /// Current value
    pub fn value(&self) -> &[f32] {
        &self.value
    }
}

/// 1-D Gaussian filter with reflected edges, truncated at 4 sigma
pub fn gaussian_filter1d(input: &[f32], sigma: f32) -> Vec<f32> {
    if input.is_empty() || sigma <= 0.0 {
        return input.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f32 / sigma).powi(2)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= total;
    }

    let n = input.len() as isize;
    let reflect = |mut i: isize| -> usize {
        // reflect mode: d c b a | a b c d | d c b a
        let period = 2 * n;
        i = i.rem_euclid(period);
        if i >= n {
            i = period - 1 - i;
        }
        i as usize
    };

    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * input[reflect(i + k as isize - radius)])
                .sum()
        })
        .collect()
}

fn hertz_to_mel(hz: f32) -> f32 {
    3340.0 * (1.0 + hz / 250.0).ln() / 9f32.ln()
}

fn mel_to_hertz(mel: f32) -> f32 {
    250.0 * (9f32.powf(mel / 3340.0) - 1.0)
}

/// Triangular Mel filterbank projecting FFT magnitudes onto perceptual bins
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    weights: Vec<Vec<f32>>,
    centers: Vec<f32>,
}

impl MelFilterbank {
    /// Filterbank with `n_bins` bands between `min_hz` and `max_hz`, for
    /// `n_fft_bands` magnitudes spanning 0 to `sample_rate / 2`
    pub fn new(n_bins: usize, n_fft_bands: usize, sample_rate: u32, min_hz: f32, max_hz: f32) -> Self {
        let mel_min = hertz_to_mel(min_hz);
        let mel_max = hertz_to_mel(max_hz);
        let delta = (mel_max - mel_min).abs() / (n_bins + 1) as f32;
        let edges: Vec<f32> = (0..n_bins + 2)
            .map(|i| mel_to_hertz(mel_min + delta * i as f32))
            .collect();

        let nyquist = sample_rate as f32 / 2.0;
        let step = if n_fft_bands > 1 {
            nyquist / (n_fft_bands - 1) as f32
        } else {
            0.0
        };
        let freqs: Vec<f32> = (0..n_fft_bands).map(|i| i as f32 * step).collect();

        let mut weights = vec![vec![0.0; n_fft_bands]; n_bins];
        for (band, row) in weights.iter_mut().enumerate() {
            let (lower, center, upper) = (edges[band], edges[band + 1], edges[band + 2]);
            for (w, f) in row.iter_mut().zip(&freqs) {
                if *f >= lower && *f <= center && center > lower {
                    *w = (f - lower) / (center - lower);
                } else if *f > center && *f <= upper && upper > center {
                    *w = (upper - f) / (upper - center);
                }
            }
        }

        Self {
            weights,
            centers: edges[1..=n_bins].to_vec(),
        }
    }

    /// Project magnitudes onto the Mel bins
    pub fn project(&self, magnitudes: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .map(|row| row.iter().zip(magnitudes).map(|(w, m)| w * m).sum())
            .collect()
    }

    /// Center frequency of every bin, in Hz
    pub fn centers(&self) -> &[f32] {
        &self.centers
    }

    /// Number of Mel bins
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// True for a filterbank without bins
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

fn mean(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Energy-based onset detector: a block whose energy jumps well above the
/// recent average is an onset
#[derive(Debug, Clone)]
pub struct EnergyOnset {
    history: VecDeque<f32>,
    history_len: usize,
    ratio: f32,
    floor: f32,
    min_gap: u32,
    since_last: u32,
}

impl EnergyOnset {
    /// Detector averaging over `history_len` blocks
    pub fn new(history_len: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(history_len),
            history_len: history_len.max(1),
            ratio: 1.5,
            floor: 1e-4,
            min_gap: 3,
            since_last: u32::MAX,
        }
    }
}

impl OnsetDetector for EnergyOnset {
    fn detect(&mut self, block: &[f32]) -> bool {
        if block.is_empty() {
            return false;
        }
        let energy = block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32;
        let average = mean(&self.history);

        self.since_last = self.since_last.saturating_add(1);
        let onset = energy > self.floor
            && self.history.len() >= self.history_len / 2
            && energy > average * self.ratio
            && self.since_last >= self.min_gap;

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(energy);

        if onset {
            self.since_last = 0;
            trace!("Onset: energy {:.5} vs average {:.5}", energy, average);
        }
        onset
    }
}

/// Tempo tracker built on high-frequency-content novelty peaks.
///
/// Peaks closer together than most of the estimated beat period are
/// ignored; inter-beat intervals feed a running tempo estimate.
pub struct HfcTempo {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    block_secs: f32,
    prev_hfc: f32,
    novelty: VecDeque<f32>,
    intervals: VecDeque<f32>,
    elapsed: f32,
    last_beat: Option<f32>,
    period: f32,
}

impl HfcTempo {
    /// Tracker for blocks of `block_len` samples at `sample_rate`
    pub fn new(block_len: usize, sample_rate: u32) -> Self {
        let size = block_len.max(2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            block_secs: block_len as f32 / sample_rate.max(1) as f32,
            prev_hfc: 0.0,
            novelty: VecDeque::with_capacity(64),
            intervals: VecDeque::with_capacity(16),
            elapsed: 0.0,
            last_beat: None,
            period: 0.5,
        }
    }

    fn hfc(&mut self, block: &[f32]) -> f32 {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex::new(block.get(i).copied().unwrap_or(0.0), 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        self.buffer[..self.buffer.len() / 2]
            .iter()
            .enumerate()
            .map(|(k, c)| k as f32 * c.norm_sqr())
            .sum()
    }
}

impl TempoDetector for HfcTempo {
    fn detect(&mut self, block: &[f32]) -> bool {
        self.elapsed += self.block_secs;
        let hfc = self.hfc(block);
        let flux = (hfc - self.prev_hfc).max(0.0);
        self.prev_hfc = hfc;

        let average = mean(&self.novelty);
        let variance = if self.novelty.is_empty() {
            0.0
        } else {
            self.novelty.iter().map(|v| (v - average).powi(2)).sum::<f32>()
                / self.novelty.len() as f32
        };
        if self.novelty.len() == 64 {
            self.novelty.pop_front();
        }
        self.novelty.push_back(flux);

        let peak = self.novelty.len() > 8 && flux > 0.0 && flux > average + 1.5 * variance.sqrt();
        if !peak {
            return false;
        }

        let since = self.last_beat.map(|t| self.elapsed - t);
        if since.is_some_and(|s| s < 0.75 * self.period) {
            return false;
        }

        if let Some(interval) = since.filter(|s| (0.3..=1.0).contains(s)) {
            if self.intervals.len() == 16 {
                self.intervals.pop_front();
            }
            self.intervals.push_back(interval);
            let mut sorted: Vec<f32> = self.intervals.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            self.period = sorted[sorted.len() / 2];
        }
        self.last_beat = Some(self.elapsed);
        true
    }

    fn bpm(&self) -> Option<f32> {
        if self.intervals.is_empty() {
            None
        } else {
            Some(60.0 / self.period)
        }
    }
}

/// Autocorrelation pitch estimator reporting MIDI note numbers
#[derive(Debug, Clone)]
pub struct AutocorrelationPitch {
    sample_rate: f32,
    min_hz: f32,
    max_hz: f32,
    tolerance: f32,
}

impl AutocorrelationPitch {
    /// Estimator for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            min_hz: 50.0,
            max_hz: 2000.0,
            tolerance: 0.6,
        }
    }
}

impl PitchDetector for AutocorrelationPitch {
    fn detect(&mut self, block: &[f32]) -> (f32, f32) {
        let n = block.len();
        let energy: f32 = block.iter().map(|s| s * s).sum();
        if n < 4 || energy <= f32::EPSILON {
            return (0.0, 0.0);
        }

        let min_lag = ((self.sample_rate / self.max_hz) as usize).max(1);
        let max_lag = ((self.sample_rate / self.min_hz) as usize).min(n / 2);
        if min_lag >= max_lag {
            return (0.0, 0.0);
        }

        let mut best = (0usize, 0.0f32);
        for lag in min_lag..=max_lag {
            let corr: f32 = block[..n - lag]
                .iter()
                .zip(&block[lag..])
                .map(|(a, b)| a * b)
                .sum();
            let normalized = corr / energy;
            if normalized > best.1 {
                best = (lag, normalized);
            }
        }

        let (lag, confidence) = best;
        if lag == 0 || confidence < self.tolerance {
            return (0.0, 0.0);
        }
        let hz = self.sample_rate / lag as f32;
        let note = 69.0 + 12.0 * (hz / 440.0).log2();
        (note, confidence.min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_exp_filter_rises_fast_and_decays_slow() {
        let mut filter = ExpFilter::new(vec![0.0], 0.1, 0.9);
        assert!((filter.update(&[1.0])[0] - 0.9).abs() < 1e-6);
        assert!((filter.update(&[0.0])[0] - 0.81).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_preserves_constant_signal() {
        let out = gaussian_filter1d(&[2.0; 10], 1.0);
        for v in out {
            assert!((v - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_gaussian_spreads_impulse() {
        let mut input = vec![0.0; 9];
        input[4] = 1.0;
        let out = gaussian_filter1d(&input, 1.0);
        assert!(out[4] < 1.0);
        assert!(out[3] > 0.0 && (out[3] - out[5]).abs() < 1e-6);
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let bank = MelFilterbank::new(24, 735, 44100, 15.0, 20000.0);
        assert_eq!(bank.len(), 24);
        assert_eq!(bank.centers().len(), 24);
        assert!(bank.centers().windows(2).all(|w| w[0] < w[1]));

        let flat = bank.project(&[1.0; 735]);
        assert_eq!(flat.len(), 24);
        assert!(flat.iter().all(|v| *v >= 0.0));
        assert!(flat.iter().skip(4).all(|v| *v > 0.0));
    }

    #[test]
    fn test_energy_onset_fires_on_jump() {
        let mut onset = EnergyOnset::new(10);
        let quiet = vec![0.01; 512];
        for _ in 0..10 {
            assert!(!onset.detect(&quiet));
        }
        assert!(onset.detect(&vec![0.5; 512]));
        // Minimum gap between onsets
        assert!(!onset.detect(&vec![0.9; 512]));
    }

    #[test]
    fn test_energy_onset_ignores_silence() {
        let mut onset = EnergyOnset::new(4);
        for _ in 0..20 {
            assert!(!onset.detect(&[0.0; 256]));
        }
    }

    #[test]
    fn test_pitch_of_a440() {
        let mut pitch = AutocorrelationPitch::new(44100);
        let block = sine(440.0, 44100, 2048, 0.5);
        let (note, confidence) = pitch.detect(&block);
        assert!(confidence > 0.6);
        assert!((note - 69.0).abs() < 0.5, "note {}", note);
    }

    #[test]
    fn test_pitch_of_silence_has_no_confidence() {
        let mut pitch = AutocorrelationPitch::new(44100);
        assert_eq!(pitch.detect(&[0.0; 1024]), (0.0, 0.0));
    }

    #[test]
    fn test_tempo_tracks_regular_clicks() {
        let rate = 44100;
        let block_len = 735;
        let mut tempo = HfcTempo::new(block_len, rate);
        let click: Vec<f32> = (0..block_len)
            .map(|i| if i % 2 == 0 { 0.8 } else { -0.8 })
            .collect();
        let quiet = vec![0.0; block_len];

        // 60 blocks/s, click every 30 blocks = 120 bpm
        let mut beats = 0;
        for i in 0..600 {
            let block = if i % 30 == 0 { &click } else { &quiet };
            if tempo.detect(block) {
                beats += 1;
            }
        }
        assert!(beats >= 15, "beats {}", beats);
        let bpm = tempo.bpm().unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "bpm {}", bpm);
    }
}
