//! Errors raised while encoding or decoding dmbus frames.

use crate::codec::{HEADER_SIZE, MAX_MSG_LEN};
use crate::message::EDID_LEN;

/// Alias for `Result<T, dmbus_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog-level encode/decode failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Fewer bytes than a header (or a prologue) were supplied.
    #[error("truncated buffer (header is {HEADER_SIZE} bytes)")]
    Truncated,

    /// The type tag is not part of this catalog.
    #[error("unrecognized message type {0}")]
    UnknownType(u32),

    /// The header's length field disagrees with the frame it describes.
    #[error("header declares {declared} bytes but frame holds {actual}")]
    BadLength {
        /// Length stamped in the header.
        declared: usize,
        /// Length actually available.
        actual: usize,
    },

    /// An EDID blob of the wrong size.
    #[error("EDID must be {EDID_LEN} bytes, got {0}")]
    EdidLength(usize),

    /// An encoded frame would not fit the receive buffer of a peer.
    #[error("frame of {0} bytes exceeds the {MAX_MSG_LEN}-byte limit")]
    TooLarge(usize),

    /// The device type in a prologue is unknown.
    #[error("unknown device type {0}")]
    UnknownDevice(u32),

    /// Payload (de)serialization failed.
    #[error("payload codec: {0}")]
    Codec(#[from] postcard::Error),

    /// The protocol fingerprint constant is not valid hex.
    #[error("protocol fingerprint: {0}")]
    Fingerprint(#[from] hex::FromHexError),
}
