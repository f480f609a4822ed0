#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Adversarial edge-case tests for the message buffer and framing layer.
//! Boundary conditions, truncated and oversized input, and overflow-proof
//! size arithmetic.

use bytes::{BufMut, BytesMut};
use realm_transport::message::codec::{
    NetworkMessage, INITIAL_BUFFER_POSITION, MAX_BODY_LENGTH, NETWORKMESSAGE_MAXSIZE,
};
use realm_transport::message::FrameCodec;
use realm_transport::TransportError;
use tokio_util::codec::Decoder;

// ============================================================================
// BUFFER BOUNDARY EDGE CASES
// ============================================================================

#[test]
fn reads_never_escape_buffer_with_adversarial_position() {
    let mut msg = NetworkMessage::new();
    msg.add_bytes(b"abc");

    // push the cursor to every legal position and read past the end
    for position in INITIAL_BUFFER_POSITION..=NETWORKMESSAGE_MAXSIZE {
        msg.set_buffer_position(position);
        let _ = msg.get_byte();
        let _ = msg.get_u32();
        let _ = msg.get_u64();
        let _ = msg.get_string(Some(u16::MAX));
    }
    // if any access had left the buffer we would have panicked long ago
}

#[test]
fn string_claiming_max_length_on_empty_buffer_is_sentinel() {
    let mut msg = NetworkMessage::new();
    assert_eq!(msg.get_string(Some(u16::MAX)), "");
    assert!(msg.is_overrun());
}

#[test]
fn exact_capacity_write_succeeds_one_byte_more_fails_cleanly() {
    let mut msg = NetworkMessage::new();
    msg.add_bytes(&vec![0xEE; MAX_BODY_LENGTH]);
    assert_eq!(msg.get_length(), MAX_BODY_LENGTH);
    assert!(!msg.is_overrun());

    let snapshot_position = msg.get_buffer_position();
    msg.add_byte(0x01);
    msg.add_u32(0xFFFF_FFFF);
    msg.add_string("overflow");
    assert_eq!(msg.get_length(), MAX_BODY_LENGTH);
    assert_eq!(msg.get_buffer_position(), snapshot_position);
    assert!(msg.is_overrun());
}

#[test]
fn size_arithmetic_cannot_wrap() {
    let mut msg = NetworkMessage::new();
    msg.set_buffer_position(NETWORKMESSAGE_MAXSIZE);

    // position + size would overflow a narrow integer; widened math says no
    assert!(!msg.can_add(usize::MAX));
    assert!(!msg.can_read(usize::MAX));
    assert!(!msg.can_add(usize::MAX - NETWORKMESSAGE_MAXSIZE + 1));
}

#[test]
fn reset_restores_a_clean_buffer() {
    let mut msg = NetworkMessage::new();
    msg.add_string("dirty");
    msg.get_string(Some(u16::MAX));
    assert!(msg.is_overrun());

    msg.reset();
    assert!(!msg.is_overrun());
    assert_eq!(msg.get_length(), 0);
    assert_eq!(msg.get_buffer_position(), INITIAL_BUFFER_POSITION);
}

// ============================================================================
// FRAMING EDGE CASES
// ============================================================================

#[test]
fn truncated_header_waits_for_more_bytes() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::from(&[0x10u8][..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(buf.len(), 1, "no bytes consumed while incomplete");
}

#[test]
fn truncated_body_waits_for_more_bytes() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    buf.put_u16_le(100);
    buf.put_slice(&[0xAA; 99]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(buf.len(), 101);
}

#[test]
fn zero_length_frame_is_a_protocol_violation() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    buf.put_u16_le(0);
    buf.put_slice(b"junk after");
    assert!(matches!(
        codec.decode(&mut buf),
        Err(TransportError::EmptyFrame)
    ));
}

#[test]
fn oversized_claim_is_rejected_before_the_body_arrives() {
    let mut codec = FrameCodec::new(512);
    let mut buf = BytesMut::new();
    // claims 64KB-1: rejected from the header alone
    buf.put_u16_le(u16::MAX);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(TransportError::OversizedFrame(65535))
    ));
}

#[test]
fn back_to_back_frames_decode_independently() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    for value in [1u8, 2, 3] {
        buf.put_u16_le(1);
        buf.put_u8(value);
    }

    for expected in [1u8, 2, 3] {
        let mut msg = codec.decode(&mut buf).unwrap().expect("frame");
        assert_eq!(msg.decode_header(), 1);
        assert_eq!(msg.get_byte(), expected);
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn garbage_after_a_valid_frame_stays_buffered() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    buf.put_u16_le(2);
    buf.put_slice(&[0x01, 0x02]);
    buf.put_u8(0x77); // start of the next, incomplete frame

    assert!(codec.decode(&mut buf).unwrap().is_some());
    assert_eq!(buf.len(), 1);
}
