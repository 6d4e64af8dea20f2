//! TCP framing and the receiver-side resynchronizing decoder
//!
//! Every packet on a TCP stream is preceded by a 16-byte frame header:
//!
//! ```text
//! ┌──────────────────┬──────────────────────┬────────────────────┐
//! │ Length (4 bytes) │ Reserved (12 bytes)  │ Packet (Length)    │
//! │ Big-endian u32   │ zero                 │ starts with "LDSP" │
//! └──────────────────┴──────────────────────┴────────────────────┘
//! ```
//!
//! Packet lengths are fixed per type, so a receiver that lost alignment
//! rescans byte by byte until a plausible length is followed by the magic.

use super::header::MAGIC;
use super::ring_buffer::RingBuffer;
use super::{put_u32, TYPE_C_LEN, TYPE_D_LEN};

pub const FRAME_HEADER_LEN: usize = 16;

/// Largest packet a frame can carry
pub const MAX_PACKET_LEN: usize = TYPE_D_LEN;

/// Reassembly buffer size (several frames)
const DECODER_CAPACITY: usize = 8192;

/// Write the frame header for a packet of `len` bytes
pub fn write_frame_header(buf: &mut [u8], len: usize) {
    put_u32(buf, 0, len as u32);
    buf[4..FRAME_HEADER_LEN].fill(0);
}

#[inline]
fn is_packet_len(len: usize) -> bool {
    len == TYPE_D_LEN || len == TYPE_C_LEN
}

/// Turns an arbitrary byte stream back into whole packets
pub struct FrameDecoder {
    ring: RingBuffer<DECODER_CAPACITY>,
    packet: [u8; MAX_PACKET_LEN],
    skipped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            packet: [0u8; MAX_PACKET_LEN],
            skipped: 0,
        }
    }

    /// Bytes discarded while hunting for frame alignment
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Bytes buffered but not yet part of a complete packet
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Feed received bytes and call `on_packet` for every complete packet
    pub fn feed<F: FnMut(&[u8])>(&mut self, mut bytes: &[u8], mut on_packet: F) {
        while !bytes.is_empty() {
            let taken = self.ring.extend(bytes);
            bytes = &bytes[taken..];
            while let Some(packet) = self.next_packet() {
                on_packet(packet);
            }
        }
    }

    /// Pop the next complete packet, skipping garbage in front of it
    pub fn next_packet(&mut self) -> Option<&[u8]> {
        loop {
            if self.ring.len() < FRAME_HEADER_LEN + MAGIC.len() {
                return None;
            }
            let len = self.ring.get_u32(0)? as usize;

            if !is_packet_len(len) || !self.ring.matches_at(FRAME_HEADER_LEN, &MAGIC) {
                self.ring.advance(1);
                self.skipped += 1;
                continue;
            }

            if self.ring.len() < FRAME_HEADER_LEN + len {
                return None;
            }

            self.ring.copy_out(FRAME_HEADER_LEN, &mut self.packet[..len]);
            self.ring.advance(FRAME_HEADER_LEN + len);
            return Some(&self.packet[..len]);
        }
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProcessedReturn;
    use crate::protocol::header::{GlobalHeader, PacketType};
    use crate::protocol::processed::{encode_processed, SceneFields, TypeDView};

    fn framed_packet(sequence: u32) -> Vec<u8> {
        let mut packet = [0u8; TYPE_D_LEN];
        let header = GlobalHeader {
            packet_type: PacketType::Processed,
            device_version: 1,
            sequence,
            device_id: 2,
        };
        encode_processed(&header, &ProcessedReturn::new(), &SceneFields::default(), &mut packet);

        let mut out = vec![0u8; FRAME_HEADER_LEN];
        write_frame_header(&mut out, packet.len());
        out.extend_from_slice(&packet);
        out
    }

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<u32> {
        let mut sequences = Vec::new();
        decoder.feed(bytes, |p| sequences.push(TypeDView::new(p).unwrap().sequence()));
        sequences
    }

    #[test]
    fn test_frame_header_layout() {
        let mut buf = [0xFFu8; FRAME_HEADER_LEN];
        write_frame_header(&mut buf, TYPE_C_LEN);
        assert_eq!(&buf[..4], &[0, 0, 0x02, 0x25]);
        assert!(buf[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_split_delivery() {
        let mut stream = Vec::new();
        for seq in 0..5 {
            stream.extend(framed_packet(seq));
        }

        let mut decoder = FrameDecoder::new();
        let mut sequences = Vec::new();
        for piece in stream.chunks(97) {
            sequences.extend(decode_all(&mut decoder, piece));
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(decoder.skipped_bytes(), 0);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut stream = vec![0x00, 0x00, 0x02, 0xC2, 0xAB, 0xCD, 0x17];
        stream.extend(framed_packet(10));
        stream.extend(b"LDSP\x00");
        stream.extend(framed_packet(12));

        let mut decoder = FrameDecoder::new();
        let sequences = decode_all(&mut decoder, &stream);
        assert_eq!(sequences, vec![10, 12]);
        assert_eq!(decoder.skipped_bytes(), 7 + 5);
    }

    #[test]
    fn test_large_feed_drains_in_pieces() {
        let mut stream = Vec::new();
        for seq in 0..40 {
            stream.extend(framed_packet(seq));
        }
        let mut decoder = FrameDecoder::new();
        let sequences = decode_all(&mut decoder, &stream);
        assert_eq!(sequences.len(), 40);
        assert_eq!(sequences[39], 39);
    }
}
