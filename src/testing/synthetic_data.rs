//! Synthetic frame payloads for offline testing
//!
//! Generates deterministic JPEG-shaped payloads so tests can assert on
//! content without hardware attached. The bodies vary by frame number to
//! catch accidental frame reuse in the store and distribution paths.

/// Build a JPEG-shaped payload: SOI and EOI markers around a gradient body
/// that changes with `frame_number`.
pub fn synthetic_jpeg_frame(frame_number: u64, body_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(body_len + 4);
    data.extend_from_slice(&[0xFF, 0xD8]);
    let base = (frame_number % 256) as u8;
    for i in 0..body_len {
        data.push(base.wrapping_add((i % 256) as u8));
    }
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Wrap a payload in the serial wire format: 4-byte big-endian length
/// prefix followed by the payload bytes.
pub fn wire_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_carry_jpeg_markers() {
        let frame = synthetic_jpeg_frame(0, 32);
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(frame.len(), 36);
    }

    #[test]
    fn synthetic_frames_differ_by_number() {
        let a = synthetic_jpeg_frame(0, 32);
        let b = synthetic_jpeg_frame(1, 32);
        assert_ne!(a[2], b[2]);
    }

    #[test]
    fn wire_frame_prefixes_big_endian_length() {
        let wire = wire_frame(b"abc");
        assert_eq!(&wire[..4], &[0, 0, 0, 3]);
        assert_eq!(&wire[4..], b"abc");
    }
}
