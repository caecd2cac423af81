//! Line framing for the control stream
//!
//! Input is split on runs of `\r`/`\n`. Bytes after the last terminator
//! are kept until the next read completes the line.

use tracing::warn;

/// Longest partial line kept before it is discarded
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Per-connection reassembly buffer
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every completed, non-blank line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        for (i, byte) in self.partial.iter().enumerate() {
            if *byte == b'\n' || *byte == b'\r' {
                let line = String::from_utf8_lossy(&self.partial[start..i]);
                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
                start = i + 1;
            }
        }
        self.partial.drain(..start);

        if self.partial.len() > MAX_LINE_LEN {
            warn!("Discarding {} bytes without a line terminator", self.partial.len());
            self.partial.clear();
        }
        lines
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_is_buffered() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"command\":").is_empty());
        assert_eq!(buffer.pending(), 11);
        assert_eq!(buffer.push(b" \"state\"}\n"), vec!["{\"command\": \"state\"}"]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_mixed_terminators_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"a\r\n\r\nb\rc\n\nd");
        assert_eq!(lines, vec!["a", "b", "c"]);
        assert_eq!(buffer.push(b"\r\n"), vec!["d"]);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let mut buffer = LineBuffer::new();
        let text = "\"caf\u{e9}\"\n".as_bytes();
        assert!(buffer.push(&text[..5]).is_empty());
        assert_eq!(buffer.push(&text[5..]), vec!["\"caf\u{e9}\""]);
    }
}
