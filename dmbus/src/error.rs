//! Error types for dmbus service operations.

use std::io;

use crate::framer::FrameError;
use crate::transport::PeerAddr;

/// Alias for `Result<T, dmbus::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Service`](crate::Service) operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport could not be created (resource exhaustion and the like).
    #[error("failed to create transport: {0}")]
    Create(#[source] io::Error),

    /// The transport was created but could not reach the peer.
    #[error("failed to connect to {peer}: {source}")]
    Connect {
        /// Peer the connection was attempted to.
        peer: PeerAddr,
        /// Underlying transport error.
        source: io::Error,
    },

    /// The peer accepted only part of the connection prologue.
    #[error("handshake short write: {sent} of {expected} bytes")]
    Handshake {
        /// Bytes accepted by the transport.
        sent: usize,
        /// Size of the prologue.
        expected: usize,
    },

    /// The connection is down; a reconnection is scheduled.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer sent a frame that cannot fit the receive buffer.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Proto(#[from] dmbus_proto::Error),

    /// Any other transport error.
    #[error(transparent)]
    Io(#[from] io::Error),
}
