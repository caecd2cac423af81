use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use stagelight_core::config::StripConfig;
use stagelight_core::{EngineContext, Task};
use tracing::{debug, info, warn};

use super::{Pixel, ScrollVisualizer};
use crate::dmx::RECONNECT_COOLDOWN;
use crate::{ControlError, Result};

/// Most pixels carried by one UDP packet
pub const MAX_PIXELS_PER_PACKET: usize = 126;

/// Encode the pixels that differ from `previous` as `index,r,g,b` packets.
///
/// Without a previous frame every pixel is sent. Indices are one byte, so
/// strips are limited to 256 pixels.
pub fn encode_deltas(previous: Option<&[Pixel]>, pixels: &[Pixel]) -> Vec<Vec<u8>> {
    let changed: Vec<usize> = pixels
        .iter()
        .enumerate()
        .filter(|(i, p)| previous.and_then(|prev| prev.get(*i)) != Some(*p))
        .map(|(i, _)| i)
        .collect();

    changed
        .chunks(MAX_PIXELS_PER_PACKET)
        .map(|chunk| {
            let mut packet = Vec::with_capacity(chunk.len() * 4);
            for &i in chunk {
                let [r, g, b] = pixels[i];
                packet.extend_from_slice(&[i as u8, r, g, b]);
            }
            packet
        })
        .collect()
}

/// Frame-loop task visualizing the spectrum on a networked LED strip
pub struct RemoteStrip {
    name: String,
    target: String,
    addr: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    visualizer: ScrollVisualizer,
    previous: Option<Vec<Pixel>>,
    last_attempt: Option<f64>,
}

impl RemoteStrip {
    /// Strip task from its configuration
    pub fn new(config: &StripConfig, n_bins: usize) -> Result<Self> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| ControlError::InvalidParameter(format!("{}: missing host", config.name)))?;
        let port = config
            .port
            .ok_or_else(|| ControlError::InvalidParameter(format!("{}: missing port", config.name)))?;
        let n_pixels = config.n_pixels.ok_or_else(|| {
            ControlError::InvalidParameter(format!("{}: missing n_pixels", config.name))
        })?;

        Ok(Self {
            name: config.name.clone(),
            target: format!("{}:{}", host, port),
            addr: None,
            socket: None,
            visualizer: ScrollVisualizer::new(n_pixels, n_bins),
            previous: None,
            last_attempt: None,
        })
    }

    /// Strip name
    pub fn strip_name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, now: f64) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        if self
            .last_attempt
            .is_some_and(|t| now - t < RECONNECT_COOLDOWN)
        {
            return Err(ControlError::StripError("waiting to reconnect".into()));
        }
        self.last_attempt = Some(now);

        let addr = self
            .target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ControlError::StripError(format!("{} did not resolve", self.target)))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        info!("LED strip {} sending to {}", self.name, addr);
        self.addr = Some(addr);
        self.socket = Some(socket);
        // A new connection has no idea what the strip shows
        self.previous = None;
        Ok(())
    }

    fn send(&mut self, pixels: &[Pixel]) -> Result<()> {
        let (Some(socket), Some(addr)) = (self.socket.as_ref(), self.addr) else {
            return Ok(());
        };
        for packet in encode_deltas(self.previous.as_deref(), pixels) {
            socket.send_to(&packet, addr)?;
        }
        self.previous = Some(pixels.to_vec());
        Ok(())
    }
}

impl Task for RemoteStrip {
    fn name(&self) -> &str {
        "led strip"
    }

    fn run(&mut self, ctx: &mut EngineContext) -> stagelight_core::Result<()> {
        let Some(spectrum) = ctx.frame.audio.as_ref() else {
            return Ok(());
        };
        let pixels = self.visualizer.update(spectrum);

        match self.connect(ctx.frame.now) {
            Ok(()) => {
                if let Err(e) = self.send(&pixels) {
                    warn!("LED strip {} send failed: {}", self.name, e);
                    self.socket = None;
                }
            }
            Err(e) => debug!("LED strip {} not connected: {}", self.name, e),
        }

        ctx.frame.pixels.insert(self.name.clone(), pixels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagelight_core::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_first_frame_sends_everything() {
        let pixels = vec![[1, 2, 3]; 256];
        let packets = encode_deltas(None, &pixels);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].len(), MAX_PIXELS_PER_PACKET * 4);
        assert_eq!(packets[2].len(), (256 - 2 * MAX_PIXELS_PER_PACKET) * 4);
        assert_eq!(&packets[1][..4], &[126, 1, 2, 3]);
    }

    #[test]
    fn test_only_changed_pixels_sent() {
        let before = vec![[0, 0, 0]; 10];
        let mut after = before.clone();
        after[3] = [9, 8, 7];
        after[7] = [1, 1, 1];
        let packets = encode_deltas(Some(&before), &after);
        assert_eq!(packets, vec![vec![3, 9, 8, 7, 7, 1, 1, 1]]);
        assert!(encode_deltas(Some(&after), &after).is_empty());
    }

    #[test]
    fn test_strip_task_sends_udp_and_publishes_pixels() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = StripConfig {
            name: "strip".into(),
            host: Some("127.0.0.1".into()),
            port: Some(port),
            n_pixels: Some(8),
        };
        let mut strip = RemoteStrip::new(&config, 6).unwrap();

        let clock = ManualClock::new(0.0);
        let mut ctx = EngineContext::new(Arc::new(clock));
        ctx.frame.audio = Some(vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        strip.run(&mut ctx).unwrap();

        assert_eq!(ctx.frame.pixels["strip"].len(), 8);
        let mut buf = [0u8; 1024];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(len, 8 * 4);
        assert_eq!(buf[0], 0);
    }
}
