//! Art-Net protocol implementation (Art-Net 4)
//!
//! Art-Net is a UDP-based protocol for transmitting DMX512 over Ethernet.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::{DeviceSink, UNIVERSE_SIZE};
use crate::{error::ControlError, Result};

/// Default Art-Net UDP port
pub const ARTNET_PORT: u16 = 6454;

/// Art-Net sender for outputting DMX data
pub struct ArtNetSender {
    socket: UdpSocket,
    target: SocketAddr,
    universe: u16,
    sequence: u8,
}

impl ArtNetSender {
    /// Create a new Art-Net sender
    ///
    /// # Arguments
    /// * `universe` - Art-Net universe (0-32767)
    /// * `target` - Node address, `host` or `host:port` (port defaults to 6454)
    pub fn new(universe: u16, target: &str) -> Result<Self> {
        let target = resolve_target(target)?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;

        tracing::info!("Art-Net sender created for universe {} -> {}", universe, target);

        Ok(Self {
            socket,
            target,
            universe,
            sequence: 0,
        })
    }

    /// Send one full universe
    pub fn send_dmx(&mut self, channels: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        let packet = self.build_artnet_packet(channels);
        self.socket.send_to(&packet, self.target)?;
        self.sequence = self.sequence.wrapping_add(1);

        tracing::trace!("Sent Art-Net DMX packet for universe {}", self.universe);
        Ok(())
    }

    /// Build an Art-Net DMX packet (OpDmx)
    fn build_artnet_packet(&self, channels: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
        let mut packet = vec![0u8; 18 + UNIVERSE_SIZE];

        // Header: "Art-Net\0"
        packet[0..8].copy_from_slice(b"Art-Net\0");

        // OpCode: OpDmx (0x5000)
        packet[8..10].copy_from_slice(&0x5000u16.to_le_bytes());

        // Protocol version (14)
        packet[10..12].copy_from_slice(&14u16.to_be_bytes());

        packet[12] = self.sequence;
        packet[13] = 0;

        // Universe (Port-Address)
        packet[14..16].copy_from_slice(&self.universe.to_le_bytes());

        // Length, big-endian
        packet[16..18].copy_from_slice(&(UNIVERSE_SIZE as u16).to_be_bytes());

        packet[18..].copy_from_slice(channels);
        packet
    }

    /// Universe this sender writes
    pub fn universe(&self) -> u16 {
        self.universe
    }

    /// Destination address
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DeviceSink for ArtNetSender {
    fn name(&self) -> &str {
        "artnet"
    }

    fn render(&mut self, universe: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        self.send_dmx(universe)
    }
}

fn resolve_target(target: &str) -> Result<SocketAddr> {
    let with_port = if target.contains(':') {
        target.to_string()
    } else {
        format!("{}:{}", target, ARTNET_PORT)
    };
    with_port
        .to_socket_addrs()
        .map_err(|e| ControlError::DmxError(format!("Invalid Art-Net target address: {}", e)))?
        .next()
        .ok_or_else(|| ControlError::DmxError(format!("Art-Net target {} did not resolve", target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artnet_packet_structure() {
        let mut sender = ArtNetSender::new(3, "127.0.0.1").unwrap();
        sender.sequence = 7;

        let mut channels = [0u8; UNIVERSE_SIZE];
        channels[0] = 255;
        channels[511] = 9;
        let packet = sender.build_artnet_packet(&channels);

        assert_eq!(&packet[0..8], b"Art-Net\0");
        // OpCode, little-endian
        assert_eq!(packet[8], 0x00);
        assert_eq!(packet[9], 0x50);
        // Protocol version, big-endian
        assert_eq!(packet[10], 0);
        assert_eq!(packet[11], 14);
        assert_eq!(packet[12], 7);
        assert_eq!(packet[14], 3);
        assert_eq!(packet[16], 0x02);
        assert_eq!(packet[17], 0x00);
        assert_eq!(packet[18], 255);
        assert_eq!(packet[18 + 511], 9);
        assert_eq!(packet.len(), 18 + UNIVERSE_SIZE);
    }

    #[test]
    fn test_default_port() {
        let sender = ArtNetSender::new(0, "127.0.0.1").unwrap();
        assert_eq!(sender.target().port(), ARTNET_PORT);
        let sender = ArtNetSender::new(0, "127.0.0.1:7000").unwrap();
        assert_eq!(sender.target().port(), 7000);
    }

    #[test]
    fn test_invalid_target() {
        assert!(ArtNetSender::new(0, "invalid:address").is_err());
    }

    #[test]
    fn test_packets_reach_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut sender = ArtNetSender::new(0, &addr.to_string()).unwrap();

        sender.render(&[1u8; UNIVERSE_SIZE]).unwrap();
        sender.render(&[2u8; UNIVERSE_SIZE]).unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(len, 18 + UNIVERSE_SIZE);
        assert_eq!(buf[12], 0);
        assert_eq!(buf[18], 1);
        let (_, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(buf[12], 1);
        assert_eq!(buf[18], 2);
    }
}
