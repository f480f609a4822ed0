//! # Message Layer
//!
//! Safe framing and value-level encoding for the game wire protocol.
//!
//! ## Components
//! - **NetworkMessage**: fixed-capacity buffer with position/length tracking
//!   and overflow protection
//! - **FrameCodec**: tokio codec for the 2-byte little-endian length framing
//! - **Encoding**: Latin-1 boundary transcoding for text fields
//!
//! ## Security
//! - Every read and write is bounds-checked before touching the buffer
//! - Frame lengths are validated before allocation
//! - Malformed input degrades to sentinels and diagnostics, never to
//!   out-of-bounds access

pub mod codec;
pub mod encoding;
pub mod frame;

pub use codec::{
    NetworkMessage, Position, CHECKSUM_LENGTH, HEADER_LENGTH, INITIAL_BUFFER_POSITION,
    MAX_BODY_LENGTH, NETWORKMESSAGE_MAXSIZE,
};
pub use frame::{adler32, FrameCodec};
