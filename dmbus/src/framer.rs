//! Receive buffer that reassembles frames from arbitrary read boundaries.
//!
//! Unconsumed bytes always occupy a contiguous prefix starting at offset 0.
//! A frame is complete once the prefix holds a header and at least as many
//! bytes as the header declares.

use dmbus_proto::{HEADER_SIZE, Header};

/// A header that no buffer of this size can ever complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FrameError {
    /// Declared length is smaller than the header itself.
    #[error("frame declares {0} bytes, less than its header")]
    Undersized(usize),

    /// Declared length exceeds the buffer capacity.
    #[error("frame declares {declared} bytes but the buffer holds at most {capacity}")]
    Oversized {
        /// Length stamped in the header.
        declared: usize,
        /// Capacity of the receive buffer.
        capacity: usize,
    },
}

/// Fixed-capacity reassembly buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Backing storage; its length is the capacity.
    buf: Box<[u8]>,
    /// Number of valid bytes at the front of `buf`.
    len: usize,
}

impl FrameBuffer {
    /// Allocates a buffer of `capacity` bytes (at least one header).
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(HEADER_SIZE)].into_boxed_slice(),
            len: 0,
        }
    }

    /// Maximum number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of unconsumed bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are buffered.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The unconsumed bytes.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Free space to read into; follow with [`FrameBuffer::advance`].
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Marks `n` bytes of the spare region as filled.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.buf.len(), "advance past capacity");
        self.len = (self.len + n).min(self.buf.len());
    }

    /// Copies as much of `data` as fits; returns the number of bytes taken.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Length of the leading frame if it is complete.
    ///
    /// Returns `Ok(None)` while more bytes are needed. A header this buffer
    /// can never complete is an error; callers drop the connection.
    pub fn frame_len(&self) -> Result<Option<usize>, FrameError> {
        let Some(header) = Header::parse(self.filled()) else {
            return Ok(None);
        };
        let declared = header.len();
        if declared < HEADER_SIZE {
            return Err(FrameError::Undersized(declared));
        }
        if declared > self.capacity() {
            return Err(FrameError::Oversized {
                declared,
                capacity: self.capacity(),
            });
        }
        Ok((self.len >= declared).then_some(declared))
    }

    /// The leading frame if it is complete.
    pub fn peek(&self) -> Result<Option<&[u8]>, FrameError> {
        Ok(self.frame_len()?.map(|n| &self.buf[..n]))
    }

    /// Removes the leading frame if it is complete; returns its length.
    ///
    /// Remaining bytes are moved to offset 0. Returns 0 when no complete
    /// frame is buffered.
    pub fn pop(&mut self) -> usize {
        let Ok(Some(n)) = self.frame_len() else {
            return 0;
        };
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
        n
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}
