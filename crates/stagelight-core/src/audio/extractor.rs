//! Frame-loop task running the four audio stages

use tracing::trace;

use super::beat::BeatStage;
use super::idle::IdleStage;
use super::pitch::PitchStage;
use super::smoothing::SmoothingStage;
use super::AudioSettings;
use crate::scheduler::{EngineContext, Task};
use crate::Result;

/// Converts the frame's raw PCM block into audio features.
///
/// When no block arrived this tick every stage is skipped and the audio
/// fields of the frame stay `None`.
pub struct AudioFeatureExtractor {
    smoothing: SmoothingStage,
    beat: BeatStage,
    pitch: PitchStage,
    idle: IdleStage,
    scratch: Vec<f32>,
}

impl AudioFeatureExtractor {
    /// Extractor with the built-in detectors
    pub fn new(settings: &AudioSettings) -> Self {
        Self::with_stages(
            SmoothingStage::new(settings),
            BeatStage::new(settings),
            PitchStage::new(settings),
            IdleStage::new(settings.idle_threshold),
        )
    }

    /// Extractor assembled from explicit stages
    pub fn with_stages(
        smoothing: SmoothingStage,
        beat: BeatStage,
        pitch: PitchStage,
        idle: IdleStage,
    ) -> Self {
        Self {
            smoothing,
            beat,
            pitch,
            idle,
            scratch: Vec::new(),
        }
    }
}

impl Task for AudioFeatureExtractor {
    fn name(&self) -> &str {
        "audio features"
    }

    fn run(&mut self, ctx: &mut EngineContext) -> Result<()> {
        let frame = &mut ctx.frame;
        let Some(raw) = frame.raw_audio.as_ref() else {
            return Ok(());
        };

        self.scratch.clear();
        self.scratch
            .extend(raw.iter().map(|&s| f32::from(s) / 32768.0));

        let spectrum = self.smoothing.process(&self.scratch);

        let beat = self.beat.process(&self.scratch);
        frame.is_onset = Some(beat.is_onset);
        frame.is_beat = Some(beat.is_beat);

        frame.pitch = self.pitch.process(&self.scratch);

        let idle = self.idle.process(&spectrum, frame.now);
        frame.audio_v_sum = Some(idle.v_sum);
        frame.audio_v_avg = Some(idle.v_avg);
        frame.idle_for = idle.idle_for;
        frame.dead_for = idle.dead_for;

        trace!(
            v_sum = idle.v_sum,
            onset = beat.is_onset,
            beat = beat.is_beat,
            "audio features"
        );
        frame.audio = Some(spectrum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn context(clock: &ManualClock) -> EngineContext {
        EngineContext::new(Arc::new(clock.clone()))
    }

    #[test]
    fn test_no_block_leaves_frame_untouched() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let mut extractor = AudioFeatureExtractor::new(&AudioSettings::default());

        extractor.run(&mut ctx).unwrap();
        assert!(ctx.frame.audio.is_none());
        assert!(ctx.frame.is_onset.is_none());
        assert!(ctx.frame.dead_for.is_none());
        assert!(ctx.frame.audio_v_sum.is_none());
    }

    #[test]
    fn test_silent_block_sets_dead_timer() {
        let clock = ManualClock::new(5.0);
        let mut ctx = context(&clock);
        let settings = AudioSettings::default();
        let mut extractor = AudioFeatureExtractor::new(&settings);

        ctx.frame.raw_audio = Some(vec![0; settings.samples_per_frame()]);
        extractor.run(&mut ctx).unwrap();

        let audio = ctx.frame.audio.as_ref().unwrap();
        assert_eq!(audio.len(), settings.n_fft_bins);
        assert!(audio.iter().all(|&v| v == 0.0));
        assert_eq!(ctx.frame.dead_for, Some(0.0));
        assert_eq!(ctx.frame.is_onset, Some(false));
        assert_eq!(ctx.frame.pitch, None);
    }
}
