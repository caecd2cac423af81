use stagelight_core::audio::dsp::{gaussian_filter1d, ExpFilter};

use super::Pixel;

/// Per-tick decay of scrolled pixels
const SCROLL_DECAY: f32 = 0.98;

/// Blur applied along the strip each tick
const SCROLL_BLUR: f32 = 0.2;

/// Scroll effect: the loudness of the low, mid and high thirds of the
/// spectrum becomes a red/green/blue pixel that enters at the centre of the
/// strip and travels outwards, fading and blurring as it goes.
#[derive(Debug, Clone)]
pub struct ScrollVisualizer {
    n_pixels: usize,
    gain: ExpFilter,
    channels: [Vec<f32>; 3],
}

impl ScrollVisualizer {
    /// Visualizer for `n_pixels` pixels fed with `n_bins`-bin spectra
    pub fn new(n_pixels: usize, n_bins: usize) -> Self {
        let half = n_pixels / 2;
        Self {
            n_pixels,
            gain: ExpFilter::new(vec![0.01; n_bins], 0.001, 0.99),
            channels: [vec![1.0; half], vec![1.0; half], vec![1.0; half]],
        }
    }

    /// Advance one tick and return the full strip
    pub fn update(&mut self, spectrum: &[f32]) -> Vec<Pixel> {
        let squared: Vec<f32> = spectrum.iter().map(|v| v * v).collect();
        let gain = self.gain.update(&squared);
        let scaled: Vec<f32> = squared
            .iter()
            .zip(gain)
            .map(|(v, g)| v / g.max(f32::EPSILON) * 255.0)
            .collect();

        let third = scaled.len() / 3;
        let bands = [
            &scaled[..third],
            &scaled[third..2 * third],
            &scaled[2 * third..],
        ];

        for (channel, band) in self.channels.iter_mut().zip(bands) {
            if channel.is_empty() {
                continue;
            }
            channel.rotate_right(1);
            for v in channel.iter_mut() {
                *v *= SCROLL_DECAY;
            }
            *channel = gaussian_filter1d(channel, SCROLL_BLUR);
            channel[0] = band.iter().copied().fold(0.0, f32::max).trunc();
        }

        self.pixels()
    }

    /// Current strip contents: the scroll buffer mirrored around the centre
    pub fn pixels(&self) -> Vec<Pixel> {
        let half = self.channels[0].len();
        let pixel = |i: usize| -> Pixel {
            [0, 1, 2].map(|c| self.channels[c][i].clamp(0.0, 255.0) as u8)
        };
        let mut out: Vec<Pixel> = (0..half).rev().map(pixel).chain((0..half).map(pixel)).collect();
        out.resize(self.n_pixels, [0, 0, 0]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_is_mirrored() {
        let mut viz = ScrollVisualizer::new(10, 6);
        let pixels = viz.update(&[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(pixels.len(), 10);
        for i in 0..5 {
            assert_eq!(pixels[4 - i], pixels[5 + i]);
        }
    }

    #[test]
    fn test_new_color_enters_at_centre() {
        let mut viz = ScrollVisualizer::new(8, 6);
        let pixels = viz.update(&[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        // Only the low third is loud: the centre pixel is red
        assert_eq!(pixels[4][0], 255);
        assert_eq!(pixels[4][1], 0);
        assert_eq!(pixels[4][2], 0);
        assert_eq!(pixels[3], pixels[4]);
    }

    #[test]
    fn test_pixels_scroll_outwards_and_fade() {
        let mut viz = ScrollVisualizer::new(8, 6);
        viz.update(&[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let pixels = viz.update(&[0.0; 6]);
        assert_eq!(pixels[4][0], 0);
        assert!(pixels[5][0] > 200);
        assert!(pixels[5][0] < 255);
    }

    #[test]
    fn test_odd_length_is_padded() {
        let mut viz = ScrollVisualizer::new(7, 3);
        assert_eq!(viz.update(&[0.5, 0.5, 0.5]).len(), 7);
    }
}
