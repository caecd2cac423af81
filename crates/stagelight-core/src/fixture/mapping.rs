//! Mapping directives: audio triggers to property changes
//!
//! A directive names a fixture function, the audio feature that drives it
//! and a threshold. Every tick the directive selects its trigger value from
//! the frame; the profile's mapping strategy for that function then decides
//! whether to propose a new value.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::frame::Frame;

/// Audio feature that drives a directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Maximum of the selected spectrum bins
    Frequency,
    /// Whole spectrum, grouped into buckets
    FrequencyAll,
    /// Onset detected this tick
    Onset,
    /// Tempo pulse detected this tick
    Beat,
    /// Averaged pitch
    Pitch,
}

/// A spectrum bin selector: one index or an inclusive `[first, last]` range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinSpec {
    /// Single bin
    Single(usize),
    /// Inclusive range of bins
    Range([usize; 2]),
}

impl BinSpec {
    /// Bin indices covered by this selector
    pub fn indices(&self) -> RangeInclusive<usize> {
        match self {
            BinSpec::Single(i) => *i..=*i,
            BinSpec::Range([first, last]) => *first..=*last,
        }
    }
}

/// Config-declared rule mapping an audio trigger onto a fixture function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDirective {
    /// Fixture function this directive drives
    pub function: String,
    /// Feature that triggers it
    pub trigger: Trigger,
    /// Spectrum bins (frequency triggers only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bins: Vec<BinSpec>,
    /// Threshold handed to the mapping strategy
    #[serde(default)]
    pub threshold: f32,
}

/// Trigger value handed to a mapping strategy
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerValue {
    /// A single level
    Level(f32),
    /// Spectrum buckets, each a list of bin values
    Buckets(Vec<Vec<f32>>),
}

impl TriggerValue {
    /// Scalar view: the level, or the loudest bin across all buckets
    pub fn level(&self) -> f32 {
        match self {
            TriggerValue::Level(v) => *v,
            TriggerValue::Buckets(buckets) => buckets
                .iter()
                .flatten()
                .copied()
                .fold(0.0, f32::max),
        }
    }

    /// Loudest bin of every bucket
    pub fn bucket_levels(&self) -> Vec<f32> {
        match self {
            TriggerValue::Level(v) => vec![*v],
            TriggerValue::Buckets(buckets) => buckets
                .iter()
                .map(|b| b.iter().copied().fold(0.0, f32::max))
                .collect(),
        }
    }
}

impl MappingDirective {
    /// Select this directive's trigger value and threshold from the frame.
    ///
    /// Returns `None` when the feature is absent (no audio this tick, no
    /// onset, no stable pitch), in which case the directive is skipped.
    pub fn select(&self, frame: &Frame) -> Option<(TriggerValue, f32)> {
        match self.trigger {
            Trigger::Frequency => {
                let audio = frame.audio.as_ref()?;
                let loudest = self
                    .bins
                    .iter()
                    .flat_map(BinSpec::indices)
                    .filter_map(|i| audio.get(i).copied())
                    .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))))?;
                Some((TriggerValue::Level(loudest), self.threshold))
            }
            Trigger::FrequencyAll => {
                let audio = frame.audio.as_ref()?;
                let buckets = if self.bins.is_empty() {
                    audio.iter().map(|v| vec![*v]).collect()
                } else {
                    self.bins
                        .iter()
                        .map(|b| b.indices().filter_map(|i| audio.get(i).copied()).collect())
                        .collect()
                };
                Some((TriggerValue::Buckets(buckets), self.threshold))
            }
            Trigger::Onset => frame
                .is_onset
                .filter(|hit| *hit)
                .map(|_| (random_strength(), 0.0)),
            Trigger::Beat => frame
                .is_beat
                .filter(|hit| *hit)
                .map(|_| (random_strength(), 0.0)),
            Trigger::Pitch => frame
                .pitch
                .filter(|p| *p != 0.0)
                .map(|p| (TriggerValue::Level(p), self.threshold)),
        }
    }
}

// Boolean triggers carry no magnitude, so strategies get a random one in [0, 2/3).
fn random_strength() -> TriggerValue {
    TriggerValue::Level(rand::rng().random::<f32>() / 1.5)
}

/// Map `n` in `[0, 1]` onto `[min, max]`
pub fn map_to_range(n: f32, min: f32, max: f32) -> f32 {
    (max - min) * n + min
}
