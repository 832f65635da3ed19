//! Length-prefixed frame (re)assembly.
//!
//! Wire format: `AC BE LL LH <payload>`, where `LL|LH` is a little-endian
//! 16-bit payload length. [`FrameDecoder`] re-synchronizes on magic mismatch
//! by discarding one byte at a time and never hands a partial payload
//! to its caller.

const MAGIC: [u8; 2] = [0xAC, 0xBE];
const HEADER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Incrementally reassembles complete message payloads out of a raw byte
/// stream, regardless of how that stream is chunked by the underlying
/// transport (serial reads may return a handful of bytes at a time).
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly-read bytes in, draining every complete frame found so far.
    ///
    /// Returns the payloads (magic + length stripped) in wire order. Bytes
    /// belonging to an incomplete trailing frame are kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            // Resync: drop bytes until the buffer starts with the magic, or
            // is too short to tell.
            if self.buf.len() >= 2 && self.buf[0..2] != MAGIC {
                let skip = self.buf[1..]
                    .windows(2)
                    .position(|w| w == MAGIC)
                    .map(|p| p + 1)
                    .unwrap_or(self.buf.len() - 1);
                self.buf.drain(0..skip);
            }
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
            if self.buf.len() < HEADER_LEN + len {
                break;
            }
            let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.buf.drain(0..HEADER_LEN + len);
            frames.push(payload);
        }

        frames
    }
}

/// Serialize a payload into a framed wire message.
pub fn encode_frame(payload: &[u8]) -> crate::Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(crate::Error::FrameTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_frame() {
        let mut dec = FrameDecoder::new();
        let frame = encode_frame(b"hello").unwrap();
        let frames = dec.feed(&frame);
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn decodes_regardless_of_chunking() {
        let frame = encode_frame(b"0123456789").unwrap();

        let mut whole = FrameDecoder::new();
        let whole_frames = whole.feed(&frame);

        let mut byte_by_byte = FrameDecoder::new();
        let mut per_byte_frames = Vec::new();
        for b in &frame {
            per_byte_frames.extend(byte_by_byte.feed(&[*b]));
        }

        assert_eq!(whole_frames, per_byte_frames);
    }

    #[test]
    fn resyncs_on_garbage_prefix() {
        let mut dec = FrameDecoder::new();
        let mut bytes = vec![0x00, 0xFF, 0xAC]; // partial garbage, partial magic
        bytes.extend(encode_frame(b"payload").unwrap());
        let frames = dec.feed(&bytes);
        assert_eq!(frames, vec![b"payload".to_vec()]);
    }

    #[test]
    fn holds_back_partial_trailing_frame() {
        let mut dec = FrameDecoder::new();
        let frame = encode_frame(b"abcdef").unwrap();
        let frames = dec.feed(&frame[..frame.len() - 2]);
        assert!(frames.is_empty());
        let frames = dec.feed(&frame[frame.len() - 2..]);
        assert_eq!(frames, vec![b"abcdef".to_vec()]);
    }

    #[test]
    fn multiple_frames_in_one_feed() {
        let mut dec = FrameDecoder::new();
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        let frames = dec.feed(&bytes);
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
