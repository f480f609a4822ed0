//! # Service Layer
//!
//! Listener ownership and protocol demultiplexing.
//!
//! A [`Service`] describes one wire protocol that can be served from a
//! port: its identifier byte, whether its messages carry a checksum, and a
//! factory for per-connection [`Protocol`] handlers. Several services may
//! share one [`ServicePort`]; the identifier byte of the first frame of a
//! connection picks which service claims it. A single-socket service owns
//! its port outright and skips identifier sniffing.
//!
//! [`ServiceManager`] owns the full set of ports and coordinates startup
//! and shutdown draining.

pub mod manager;
pub mod port;

use crate::connection::ConnectionHandle;
use crate::message::NetworkMessage;

/// Per-connection protocol handler, constructed by a [`Service`] factory.
///
/// Handlers run on the serialized scheduler context: no two callbacks run
/// concurrently, so implementations may mutate shared game state freely.
pub trait Protocol: Send {
    /// First decoded frame of the connection, identifier byte consumed.
    fn on_recv_first_message(&mut self, msg: &mut NetworkMessage);

    /// Every later frame, in arrival order.
    fn on_recv_message(&mut self, msg: &mut NetworkMessage);

    /// The connection reached `Closed`; the handle no longer delivers.
    fn on_connection_closed(&mut self) {}
}

/// A registrable wire protocol.
pub trait Service: Send + Sync {
    /// Identifier byte carried at the start of a connection's first frame.
    fn protocol_identifier(&self) -> u8;

    /// Whether this service only accepts checksummed first frames.
    /// Non-checksummed services match either status.
    fn requires_checksum(&self) -> bool;

    /// A single-socket service owns the whole port; no identifier routing.
    fn is_single_socket(&self) -> bool {
        false
    }

    fn protocol_name(&self) -> &'static str;

    /// Build the per-connection handler. The handle queues outbound
    /// messages and can request a close.
    fn make_protocol(&self, connection: ConnectionHandle) -> Box<dyn Protocol>;
}
