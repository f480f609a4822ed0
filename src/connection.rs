//! # Connection
//!
//! One accepted socket, owned for its whole lifetime.
//!
//! The connection task reads frames through the [`FrameCodec`], classifies
//! the checksum status of the first frame, routes its protocol-identifier
//! byte through the owning [`ServicePort`], and from then on feeds frames to
//! the selected [`Protocol`], always by posting onto the scheduler's
//! serialized context, so protocol handlers never race each other.
//!
//! States move one way only: `Open → Closing → Closed`. A protocol
//! violation (oversized frame, unknown identifier, checksum mismatch)
//! closes the connection without sending the peer a diagnostic.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, trace};

use crate::context::ServerContext;
use crate::message::codec::CHECKSUM_LENGTH;
use crate::message::frame::adler32;
use crate::message::{FrameCodec, NetworkMessage};
use crate::service::port::ServicePort;
use crate::service::Protocol;

/// Connection lifecycle. Transitions are one-way; a closed connection is
/// never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

pub(crate) enum ConnectionCommand {
    Send(NetworkMessage),
    Close,
}

/// Cheap, clonable handle given to protocol handlers for the outbound path.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ConnectionCommand>,
    peer: SocketAddr,
}

impl ConnectionHandle {
    /// Queue an outbound message. Messages queued after close are dropped.
    pub fn send(&self, msg: NetworkMessage) {
        if msg.is_overrun() {
            error!(peer = %self.peer, "refusing to send overrun message");
            return;
        }
        if self.tx.send(ConnectionCommand::Send(msg)).is_err() {
            trace!(peer = %self.peer, "send after connection closed; dropped");
        }
    }

    /// Ask the connection to flush queued messages and close.
    pub fn close(&self) {
        let _ = self.tx.send(ConnectionCommand::Close);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Consume the 4-byte checksum slot when it verifies against the rest of
/// the content; leave the cursor untouched on mismatch so the bytes stay
/// readable as ordinary payload.
fn classify_checksum(msg: &mut NetworkMessage) -> bool {
    if msg.remaining() < CHECKSUM_LENGTH {
        return false;
    }
    let unread = msg.unread();
    let received = u32::from_le_bytes([unread[0], unread[1], unread[2], unread[3]]);
    let computed = adler32(&unread[CHECKSUM_LENGTH..]);
    if received == computed {
        msg.skip_bytes(CHECKSUM_LENGTH as i32);
        true
    } else {
        false
    }
}

pub struct Connection {
    framed: Framed<TcpStream, FrameCodec>,
    rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    handle: ConnectionHandle,
    state: ConnectionState,
    protocol: Option<Arc<Mutex<Box<dyn Protocol>>>>,
    requires_checksum: bool,
    service_port: Arc<ServicePort>,
    ctx: Arc<ServerContext>,
    peer: SocketAddr,
}

impl Connection {
    /// Wrap an admitted socket and run it to completion on its own task.
    pub(crate) fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        service_port: Arc<ServicePort>,
        ctx: Arc<ServerContext>,
    ) {
        let codec = FrameCodec::new(ctx.config.listener.max_frame_size);
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            framed: Framed::new(stream, codec),
            rx,
            handle: ConnectionHandle { tx, peer },
            state: ConnectionState::Open,
            protocol: None,
            requires_checksum: false,
            service_port,
            ctx,
            peer,
        };
        tokio::spawn(connection.run());
    }

    async fn run(mut self) {
        debug!(peer = %self.peer, "connection open");

        while self.state == ConnectionState::Open {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(ConnectionCommand::Send(msg)) => {
                        if let Err(e) = self.framed.send(msg).await {
                            error!(peer = %self.peer, error = %e, "write failed");
                            self.transition(ConnectionState::Closing);
                        }
                    }
                    Some(ConnectionCommand::Close) | None => {
                        self.transition(ConnectionState::Closing);
                    }
                },
                frame = self.framed.next() => match frame {
                    Some(Ok(msg)) => self.on_frame(msg),
                    Some(Err(e)) => {
                        error!(peer = %self.peer, error = %e, "protocol violation, closing connection");
                        self.transition(ConnectionState::Closing);
                    }
                    None => self.transition(ConnectionState::Closing),
                },
            }
        }

        // drain writes queued before the close request, then shut the socket
        while let Ok(command) = self.rx.try_recv() {
            if let ConnectionCommand::Send(msg) = command {
                if self.framed.send(msg).await.is_err() {
                    break;
                }
            }
        }
        let _ = self.framed.close().await;
        self.transition(ConnectionState::Closed);

        if let Some(protocol) = self.protocol.take() {
            self.ctx.scheduler.post(move || {
                protocol
                    .lock()
                    .expect("protocol handler poisoned")
                    .on_connection_closed();
            });
        }
        debug!(peer = %self.peer, "connection closed");
    }

    fn transition(&mut self, next: ConnectionState) {
        // one-way: Open → Closing → Closed
        if next > self.state {
            self.state = next;
        }
    }

    fn on_frame(&mut self, mut msg: NetworkMessage) {
        let _frame_len = msg.decode_header();

        if self.protocol.is_none() {
            self.select_protocol(msg);
            return;
        }

        if self.requires_checksum && !classify_checksum(&mut msg) {
            error!(peer = %self.peer, "checksum mismatch, closing connection");
            self.transition(ConnectionState::Closing);
            return;
        }

        let protocol = Arc::clone(self.protocol.as_ref().expect("protocol selected"));
        self.ctx.scheduler.post(move || {
            protocol
                .lock()
                .expect("protocol handler poisoned")
                .on_recv_message(&mut msg);
        });
    }

    /// First-frame routing: checksum classification, then identifier scan,
    /// unless a single-socket service owns the port outright.
    fn select_protocol(&mut self, mut msg: NetworkMessage) {
        let checksummed = classify_checksum(&mut msg);

        let service = if let Some(single) = self.service_port.single_socket_service() {
            Some(single)
        } else {
            self.service_port.select_service(checksummed, &mut msg)
        };

        let Some(service) = service else {
            // fail-closed: the peer gets no diagnostic
            self.transition(ConnectionState::Closing);
            return;
        };

        self.requires_checksum = service.requires_checksum();
        self.framed
            .codec_mut()
            .set_append_checksum(self.requires_checksum);

        let protocol = Arc::new(Mutex::new(service.make_protocol(self.handle.clone())));
        self.protocol = Some(Arc::clone(&protocol));

        debug!(peer = %self.peer, service = service.protocol_name(), "protocol selected");
        self.ctx.scheduler.post(move || {
            protocol
                .lock()
                .expect("protocol handler poisoned")
                .on_recv_first_message(&mut msg);
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::message::codec::NetworkMessage;

    fn checksummed_body(content: &[u8]) -> Vec<u8> {
        let mut body = adler32(content).to_le_bytes().to_vec();
        body.extend_from_slice(content);
        body
    }

    #[test]
    fn classify_consumes_valid_checksum() {
        let body = checksummed_body(&[0x01, 0xAA, 0xBB]);
        let mut frame = vec![body.len() as u8, 0];
        frame.extend_from_slice(&body);

        let mut msg = NetworkMessage::from_frame(&frame).unwrap();
        msg.decode_header();
        assert!(classify_checksum(&mut msg));
        assert_eq!(msg.get_byte(), 0x01);
    }

    #[test]
    fn classify_leaves_plain_body_untouched() {
        let body = [0x02, 0x10, 0x20, 0x30, 0x40];
        let mut frame = vec![body.len() as u8, 0];
        frame.extend_from_slice(&body);

        let mut msg = NetworkMessage::from_frame(&frame).unwrap();
        msg.decode_header();
        assert!(!classify_checksum(&mut msg));
        assert_eq!(msg.get_byte(), 0x02);
    }

    #[test]
    fn classify_short_body_is_not_checksummed() {
        let mut msg = NetworkMessage::from_frame(&[0x02, 0x00, 0x09, 0x01]).unwrap();
        msg.decode_header();
        assert!(!classify_checksum(&mut msg));
        assert_eq!(msg.get_byte(), 0x09);
    }

    #[test]
    fn state_transitions_are_one_way() {
        assert!(ConnectionState::Closing > ConnectionState::Open);
        assert!(ConnectionState::Closed > ConnectionState::Closing);
    }
}
