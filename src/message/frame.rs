//! # Wire Framing
//!
//! Tokio codec for the length-prefixed game framing over byte streams.
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Checksum(4, LE, optional)] [Identifier(1)] [Body(N)]
//! ```
//!
//! The length is validated against the configured maximum before any
//! allocation or copy; zero-length and oversized frames are protocol
//! violations that close the connection.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;
use crate::message::codec::{NetworkMessage, CHECKSUM_LENGTH, HEADER_LENGTH};

/// adler-32 over a frame body; the checksum the original game protocol
/// carries between the length header and the identifier byte.
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    // chunked so the running sums stay well below u32 overflow
    const CHUNK: usize = 5552;

    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in data.chunks(CHUNK) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}

/// Framing codec: decodes inbound frames into staged [`NetworkMessage`]s
/// and frames outbound content, optionally prepending the adler-32
/// checksum when the selected service requires one.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    append_checksum: bool,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            append_checksum: false,
        }
    }

    /// Once a checksummed service claims the connection, outbound frames
    /// carry a checksum too.
    pub fn set_append_checksum(&mut self, enabled: bool) {
        self.append_checksum = enabled;
    }
}

impl Decoder for FrameCodec {
    type Item = NetworkMessage;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<NetworkMessage>, TransportError> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let frame_len = u16::from_le_bytes([src[0], src[1]]) as usize;
        if frame_len == 0 {
            return Err(TransportError::EmptyFrame);
        }
        if frame_len > self.max_frame_size {
            return Err(TransportError::OversizedFrame(frame_len));
        }

        let total = HEADER_LENGTH + frame_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        // staged with the header so decode_header() sees the wire prefix
        NetworkMessage::from_frame(&frame)
            .map(Some)
            .ok_or(TransportError::OversizedFrame(frame_len))
    }
}

impl Encoder<NetworkMessage> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, msg: NetworkMessage, dst: &mut BytesMut) -> Result<(), TransportError> {
        let content = msg.content();
        let checksum_len = if self.append_checksum { CHECKSUM_LENGTH } else { 0 };
        let total = content.len() + checksum_len;
        if total > self.max_frame_size {
            return Err(TransportError::OversizedFrame(total));
        }
        let frame_len =
            u16::try_from(total).map_err(|_| TransportError::OversizedFrame(total))?;

        dst.reserve(HEADER_LENGTH + total);
        dst.put_u16_le(frame_len);
        if self.append_checksum {
            dst.put_u32_le(adler32(content));
        }
        dst.put_slice(content);
        Ok(())
    }
}
