//! Byte-at-a-time frame assembly shared by the reply path and the streaming path.

use crate::protocol::{SYNC, STATUS_FRAME_OVERHEAD};

/// Size of the receive area. Frames declaring more than `MAX_FRAME_SIZE - 7`
/// payload bytes cannot be held.
pub const MAX_FRAME_SIZE: usize = 255;

/// Assembles incoming bytes into complete frames.
///
/// Bytes are ignored until a sync byte is seen at offset zero. A frame is
/// complete once `declared length + 7` bytes have been collected. A corrupt
/// length byte that runs past the receive area wraps the offset back to the
/// start; the framer recovers on a later sync byte but the frame in progress
/// is lost and the wrapped bytes may be misread.
pub struct Framer {
    buf: [u8; MAX_FRAME_SIZE],
    head: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; MAX_FRAME_SIZE],
            head: 0,
        }
    }

    /// Feed one byte. Returns the complete frame when this byte finishes one.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if self.head == 0 && byte != SYNC {
            return None;
        }

        self.buf[self.head] = byte;
        self.head = (self.head + 1) % MAX_FRAME_SIZE;

        let frame_len = self.buf[1] as usize + STATUS_FRAME_OVERHEAD;
        if self.head > 1 && self.head == frame_len {
            self.buf[frame_len..].fill(0);
            self.head = 0;
            return Some(&self.buf[..frame_len]);
        }
        None
    }

    /// Number of bytes collected toward the frame in progress
    pub fn pending(&self) -> usize {
        self.head
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_response;

    fn keep_alive() -> Vec<u8> {
        encode_response(0x22, 0x0400, &[])
    }

    /// Feed `data` in chunks of `chunk` bytes, collecting every completed frame
    fn feed_chunked(framer: &mut Framer, data: &[u8], chunk: usize) -> Vec<(usize, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut index = 0;
        for part in data.chunks(chunk) {
            for &byte in part {
                if let Some(frame) = framer.feed(byte) {
                    frames.push((index, frame.to_vec()));
                }
                index += 1;
            }
        }
        frames
    }

    #[test]
    fn test_single_completion_on_last_byte() {
        let frame = encode_response(0x9B, 0x0000, &[0x05, 0x00]);
        for chunk in [1, 2, 3, 7, frame.len()] {
            let mut framer = Framer::new();
            let frames = feed_chunked(&mut framer, &frame, chunk);
            assert_eq!(frames.len(), 1, "chunk size {}", chunk);
            assert_eq!(frames[0].0, frame.len() - 1);
            assert_eq!(frames[0].1, frame);
            assert_eq!(framer.pending(), 0);
        }
    }

    #[test]
    fn test_noise_before_frame_is_discarded() {
        let frame = keep_alive();
        let mut data = vec![0x00, 0x13, 0x7E, 0xAA, 0x22, 0x05];
        data.extend_from_slice(&frame);

        let mut framer = Framer::new();
        let frames = feed_chunked(&mut framer, &data, 4);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, frame);
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = keep_alive();
        let second = encode_response(0x03, 0x0000, &[0x01, 0x02, 0x03]);
        let mut data = first.clone();
        data.extend_from_slice(&second);

        let mut framer = Framer::new();
        let frames = feed_chunked(&mut framer, &data, 5);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].1, first);
        assert_eq!(frames[1].1, second);
    }

    #[test]
    fn test_completion_clears_stale_bytes() {
        let long = encode_response(0x03, 0x0000, &[0xAB; 20]);
        let short = keep_alive();

        let mut framer = Framer::new();
        feed_chunked(&mut framer, &long, 1);
        let frames = feed_chunked(&mut framer, &short, 1);
        assert_eq!(frames[0].1, short);
        assert!(framer.buf[short.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_corrupt_length_wraps_and_resyncs() {
        // Declared length 0xFA needs 257 bytes, more than the receive area holds
        let mut stream = vec![SYNC, 0xFA, 0x22];
        for _ in 0..60 {
            stream.extend_from_slice(&keep_alive());
        }

        let mut framer = Framer::new();
        let frames = feed_chunked(&mut framer, &stream, 16);

        // The first 36 keep-alives fill the area up to the wrap and are lost
        assert_eq!(frames.len(), 24);
        assert!(frames.iter().all(|(_, frame)| *frame == keep_alive()));
        assert_eq!(frames[0].0, 3 + 37 * 7 - 1);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let frame = keep_alive();
        let mut framer = Framer::new();
        feed_chunked(&mut framer, &frame[..4], 1);
        assert_eq!(framer.pending(), 4);

        framer.reset();
        assert_eq!(framer.pending(), 0);
        let frames = feed_chunked(&mut framer, &frame, 1);
        assert_eq!(frames.len(), 1);
    }
}
