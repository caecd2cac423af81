//! LED strip output
//!
//! - [`ScrollVisualizer`]: spectrum to pixels, scrolling out from the centre
//! - [`encode_deltas`]: pixel-delta UDP packet encoding
//! - [`RemoteStrip`]: frame-loop task driving one networked strip

mod strip;
mod visualizer;

pub use strip::{encode_deltas, RemoteStrip, MAX_PIXELS_PER_PACKET};
pub use visualizer::ScrollVisualizer;

/// One RGB pixel
pub type Pixel = [u8; 3];
