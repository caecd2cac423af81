//! One connected control client

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use super::framing::LineBuffer;
use super::protocol::Envelope;

/// Most reply bytes held for a client that is not reading
pub const MAX_OUTBOUND: usize = 4 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// Result of draining the socket
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete lines received
    pub lines: Vec<String>,
    /// The peer closed the connection or the read failed
    pub closed: bool,
}

/// A client socket with its reassembly and outbound buffers
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    input: LineBuffer,
    outbound: Vec<u8>,
    monitor: bool,
}

impl Connection {
    /// Wrap an accepted stream; switches it to non-blocking mode
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            id,
            peer,
            stream,
            input: LineBuffer::new(),
            outbound: Vec::new(),
            monitor: false,
        })
    }

    /// Server-assigned id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether this client receives monitor broadcasts
    pub fn is_monitoring(&self) -> bool {
        self.monitor
    }

    /// Subscribe or unsubscribe from monitor broadcasts
    pub fn set_monitoring(&mut self, monitor: bool) {
        self.monitor = monitor;
    }

    /// Read everything available without blocking
    pub fn read_lines(&mut self) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    outcome.closed = true;
                    break;
                }
                Ok(n) => outcome.lines.extend(self.input.push(&chunk[..n])),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    outcome.closed = true;
                    break;
                }
            }
        }
        outcome
    }

    /// Queue an envelope and write as much as the socket accepts
    pub fn send(&mut self, envelope: &Envelope) -> io::Result<()> {
        let line = envelope
            .to_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.outbound.extend_from_slice(&line);
        self.flush()
    }

    /// Write queued bytes until the socket would block
    pub fn flush(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.outbound.len() {
            match self.stream.write(&self.outbound[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.outbound.drain(..written);

        if self.outbound.len() > MAX_OUTBOUND {
            return Err(io::Error::other(format!(
                "{} bytes backed up",
                self.outbound.len()
            )));
        }
        Ok(())
    }

    /// Bytes still waiting to be written
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    /// Write remaining output with blocking writes, then close
    pub fn close(mut self, envelope: Option<&Envelope>) {
        let _ = self.stream.set_nonblocking(false);
        let _ = self
            .stream
            .set_write_timeout(Some(std::time::Duration::from_millis(250)));
        if let Some(envelope) = envelope {
            if let Ok(line) = envelope.to_line() {
                self.outbound.extend_from_slice(&line);
            }
        }
        let _ = self.stream.write_all(&self.outbound);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
