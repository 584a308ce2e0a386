//! Frame header layout and whole-frame encode/decode.
//!
//! Each frame is: `[u32 LE msg_type][u32 LE msg_len][postcard payload]`.
//! `msg_len` is the length of the entire frame, header included.

use crate::error::{Error, Result};
use crate::message::{Message, MsgType};

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 8;

/// Largest frame a peer may send (4 KiB). Receive buffers are sized to this.
pub const MAX_MSG_LEN: usize = 4096;

/// The two header fields every frame starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw type tag; may be outside the known catalog.
    pub msg_type: u32,
    /// Total frame length including this header.
    pub msg_len: u32,
}

impl Header {
    /// Reads a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `None` if `buf` is shorter than a header.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let ty = buf.get(0..4)?;
        let len = buf.get(4..HEADER_SIZE)?;
        Some(Self {
            msg_type: u32::from_le_bytes([ty[0], ty[1], ty[2], ty[3]]),
            msg_len: u32::from_le_bytes([len[0], len[1], len[2], len[3]]),
        })
    }

    /// Stamps this header into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn write(self, buf: &mut [u8]) -> Result<()> {
        let dst = buf.get_mut(..HEADER_SIZE).ok_or(Error::Truncated)?;
        dst[..4].copy_from_slice(&self.msg_type.to_le_bytes());
        dst[4..].copy_from_slice(&self.msg_len.to_le_bytes());
        Ok(())
    }

    /// Declared frame length as a `usize`.
    pub const fn len(self) -> usize {
        self.msg_len as usize
    }

    /// Whether the frame carries no payload.
    pub const fn is_empty(self) -> bool {
        self.len() <= HEADER_SIZE
    }
}

/// Encodes `msg` into a complete, stamped frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let payload = msg.payload()?;
    let total = HEADER_SIZE + payload.len();
    if total > MAX_MSG_LEN {
        return Err(Error::TooLarge(total));
    }
    let mut frame = vec![0u8; HEADER_SIZE];
    frame.extend_from_slice(&payload);
    #[allow(clippy::cast_possible_truncation)]
    let header = Header {
        msg_type: msg.msg_type().tag(),
        msg_len: total as u32,
    };
    header.write(&mut frame)?;
    Ok(frame)
}

/// Decodes one complete frame.
///
/// `frame` must hold exactly the bytes the header declares.
pub fn decode(frame: &[u8]) -> Result<Message> {
    let header = Header::parse(frame).ok_or(Error::Truncated)?;
    if header.len() != frame.len() {
        return Err(Error::BadLength {
            declared: header.len(),
            actual: frame.len(),
        });
    }
    let ty = MsgType::try_from(header.msg_type)?;
    Message::from_payload(ty, &frame[HEADER_SIZE..])
}
