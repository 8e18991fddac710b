//! Length-prefixed frame parsing for command/response links.
//!
//! The device family frames every payload as a 4-byte big-endian length
//! followed by exactly that many bytes, and answers command tokens with a
//! newline-terminated status line. Both are parsed here against a bounded
//! byte source so a stalled or malformed device can only ever produce a
//! tagged error, never a hang or a panic.

use crate::errors::TransportError;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Bounded source of raw bytes the parser pulls from.
///
/// `read_wait` fills `buf` with whatever is available, waiting at most
/// `wait`. Returning `Timeout` when nothing arrives in time is part of the
/// contract; the parser turns it into a whole-read timeout against its
/// deadline.
pub trait ByteSource {
    fn read_wait(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, TransportError>;
}

const LEN_PREFIX_BYTES: usize = 4;

/// Parser for the length-prefixed frame and status-line wire format.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Read one complete frame payload: 4-byte big-endian length, then the
    /// payload. A declared length of zero or above the configured maximum is
    /// a protocol error; the caller is expected to flush the link before the
    /// next exchange.
    pub fn read_frame(
        &self,
        src: &mut dyn ByteSource,
        deadline: Instant,
    ) -> Result<Bytes, TransportError> {
        let mut prefix = [0u8; LEN_PREFIX_BYTES];
        read_exact(src, &mut prefix, deadline)?;

        let declared = u32::from_be_bytes(prefix) as usize;
        if declared == 0 {
            return Err(TransportError::Protocol(
                "declared frame length is zero".to_string(),
            ));
        }
        if declared > self.max_frame_bytes {
            return Err(TransportError::Protocol(format!(
                "declared frame length {} exceeds maximum {}",
                declared, self.max_frame_bytes
            )));
        }

        let mut payload = vec![0u8; declared];
        read_exact(src, &mut payload, deadline)?;
        Ok(Bytes::from(payload))
    }

    /// Read one newline-terminated status line, at most `max_line` bytes.
    /// The trailing newline (and carriage return, if any) is stripped.
    pub fn read_status_line(
        &self,
        src: &mut dyn ByteSource,
        deadline: Instant,
        max_line: usize,
    ) -> Result<String, TransportError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let n = src.read_wait(&mut byte, deadline - now)?;
            if n == 0 {
                continue;
            }
            if byte[0] == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            line.push(byte[0]);
            if line.len() > max_line {
                return Err(TransportError::Protocol(format!(
                    "status line exceeds {} bytes without terminator",
                    max_line
                )));
            }
        }
    }
}

/// Fill `buf` completely or fail with `Timeout` at the deadline.
fn read_exact(
    src: &mut dyn ByteSource,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout);
        }
        let n = src.read_wait(&mut buf[filled..], deadline - now)?;
        filled += n;
    }
    Ok(())
}
