//! # Realm Transport
//!
//! Transport and scheduling core for persistent multiplayer game servers.
//!
//! This crate is the layer between the sockets and the game: it accepts
//! inbound connections, demultiplexes several wire protocols sharing one
//! listening port, frames and decodes binary messages safely against a
//! fixed-size buffer, and provides the single deferred-execution facility
//! the rest of the server schedules delayed and periodic work through.
//!
//! ## Components
//! - **[`message`]**: bounds-checked message buffer and wire framing
//! - **[`scheduler`]**: serialized, time-ordered, cancelable callbacks
//! - **[`connection`]**: per-socket read/write task and protocol handoff
//! - **[`service`]**: listener ownership and protocol demultiplexing
//! - **[`admission`]**: ban-list gate consulted on every accept
//! - **[`webhook`]**: outbound notification queue with retry
//!
//! ## Wire Format
//! ```text
//! [Length(2, LE)] [Checksum(4, LE, optional)] [Identifier(1)] [Body(N)]
//! ```
//!
//! ## Concurrency
//! The tokio reactor drives accepts, reads, and writes; everything that
//! mutates shared state is funneled onto the scheduler's single serialized
//! context. I/O handlers do the minimum (read bytes, identify the
//! protocol) and post the rest.
//!
//! ## Security
//! - Every buffer access is bounds-checked; malformed or truncated input
//!   degrades to sentinels and structured diagnostics, never to
//!   out-of-bounds access
//! - Frame lengths are validated before allocation
//! - Unknown protocols and checksum mismatches fail closed: the connection
//!   is dropped without a diagnostic to the peer
//!
//! Encryption is out of scope: an external transform is applied to raw
//! bytes on either side of this layer.

pub mod admission;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod message;
pub mod scheduler;
pub mod service;
pub mod webhook;

pub use admission::{AdmissionPolicy, AllowAll, BanList};
pub use config::CoreConfig;
pub use connection::{ConnectionHandle, ConnectionState};
pub use context::ServerContext;
pub use error::{Result, TransportError};
pub use message::{FrameCodec, NetworkMessage, Position};
pub use scheduler::{Scheduler, TaskId, SCHEDULER_MINTICKS};
pub use service::manager::ServiceManager;
pub use service::port::ServicePort;
pub use service::{Protocol, Service};
pub use webhook::Webhook;
