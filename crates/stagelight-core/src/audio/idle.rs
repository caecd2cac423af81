//! Idle/dead stage: how long the spectrum has been quiet or silent

/// Output of the idle stage for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IdleReport {
    /// Sum of all bins
    pub v_sum: f32,
    /// Mean bin value
    pub v_avg: f32,
    /// Seconds below the idle threshold, if currently idle
    pub idle_for: Option<f64>,
    /// Seconds of exact silence, if currently dead
    pub dead_for: Option<f64>,
}

/// Tracks the idle and dead timers
#[derive(Debug, Clone)]
pub struct IdleStage {
    threshold: f32,
    idle_since: Option<f64>,
    dead_since: Option<f64>,
}

impl IdleStage {
    /// Stage treating a mean below `threshold` as idle
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            idle_since: None,
            dead_since: None,
        }
    }

    /// Update the timers from the smoothed spectrum
    pub fn process(&mut self, spectrum: &[f32], now: f64) -> IdleReport {
        let v_sum: f32 = spectrum.iter().sum();
        let v_avg = if spectrum.is_empty() {
            0.0
        } else {
            v_sum / spectrum.len() as f32
        };

        if v_avg < self.threshold {
            self.idle_since.get_or_insert(now);
        } else {
            self.idle_since = None;
        }

        if v_sum == 0.0 {
            self.dead_since.get_or_insert(now);
        } else {
            self.dead_since = None;
        }

        IdleReport {
            v_sum,
            v_avg,
            idle_for: self.idle_since.map(|t| now - t),
            dead_for: self.dead_since.map(|t| now - t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_timer_counts_and_clears() {
        let mut stage = IdleStage::new(0.05);
        let silent = [0.0; 4];

        let first = stage.process(&silent, 10.0);
        assert_eq!(first.dead_for, Some(0.0));
        assert_eq!(first.idle_for, Some(0.0));

        let later = stage.process(&silent, 12.5);
        assert_eq!(later.dead_for, Some(2.5));

        let loud = stage.process(&[0.5, 0.1, 0.0, 0.0], 13.0);
        assert_eq!(loud.dead_for, None);
        assert_eq!(loud.idle_for, None);
        assert!((loud.v_sum - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_quiet_is_idle_but_not_dead() {
        let mut stage = IdleStage::new(0.05);
        stage.process(&[0.01; 4], 1.0);
        let report = stage.process(&[0.01; 4], 2.0);
        assert_eq!(report.idle_for, Some(1.0));
        assert_eq!(report.dead_for, None);
    }
}
