//! # Error Types
//!
//! Comprehensive error handling for the transport core.
//!
//! This module defines all error variants that can occur between the socket
//! and the protocol layer, from low-level I/O failures to protocol
//! violations on untrusted input.
//!
//! ## Error Categories
//! - **I/O Errors**: bind, accept, read, and write failures
//! - **Protocol Violations**: oversized frames, unknown protocol
//!   identifiers, buffer overruns
//! - **Configuration Errors**: unresolvable bind addresses, invalid settings
//! - **Scheduling Errors**: operations against a stopped scheduler
//!
//! Transient I/O errors are recovered with a fixed backoff; protocol
//! violations close the offending connection and nothing else; startup
//! errors are fatal only to the listener that raised them. All errors
//! implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// TransportError is the primary error type for all transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not resolve bind address '{0}'")]
    AddressResolution(String),

    #[error("bind failed on port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("message buffer overrun at position {position} (length {length})")]
    BufferOverrun { position: usize, length: usize },

    #[error("frame length {0} exceeds maximum message size")]
    OversizedFrame(usize),

    #[error("frame length is zero")]
    EmptyFrame,

    #[error("no service registered for protocol identifier {0:#04x}")]
    UnknownProtocol(u8),

    #[error("service registration rejected: {0}")]
    ServiceRegistration(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("scheduler is stopped")]
    SchedulerStopped,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

/// Type alias for Results using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;
