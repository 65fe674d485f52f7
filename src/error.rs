//! Error taxonomy for the redistribution library
//!
//! Setup failures (bind, accept, connect) are returned synchronously to the
//! call that triggered them. Failures inside the background loops only close
//! the affected connection; they are logged with the same variants so log
//! lines and returned errors read alike.

use crate::distributed::address::EndpointAddress;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedistError {
    /// Bind, listen, accept or connect failed
    #[error("transport setup failed for {address}: {source}")]
    TransportSetup {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Mid-stream read or write failure on one connection
    #[error("transport I/O error with {peer}: {source}")]
    TransportIo {
        peer: EndpointAddress,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed its side of the connection
    #[error("peer {0} closed the connection")]
    PeerClosed(EndpointAddress),

    /// The overlap calculator was given descriptors of different rank
    #[error("mismatched dimensionality: {left} axes vs {right} axes")]
    MismatchedDimensionality { left: usize, right: usize },

    /// No mailbox registered for an incoming message
    #[error("no mailbox {mailbox} registered for message from {sender}")]
    UnroutableMessage { sender: EndpointAddress, mailbox: u32 },

    /// A participant re-advertised while a round was in flight
    #[error("rank {rank} re-advertised during an active round of '{name}'")]
    DuplicateAdvertise { name: String, rank: u32 },

    /// A local buffer does not match the block it is supposed to hold
    #[error("buffer holds {actual} bytes, block needs {expected}")]
    BufferSize { expected: u64, actual: usize },

    /// Malformed frame, oversized frame or protocol version mismatch
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The endpoint or coordinator was shut down while the caller waited
    #[error("shut down")]
    Shutdown,
}

impl RedistError {
    /// Whether this error ends the endpoint (as opposed to one connection)
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedistError::TransportSetup { .. } | RedistError::Shutdown)
    }
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, RedistError>;
