//! Length-prefixed frame encoding/decoding for the stream transport
//!
//! Wire format: [4-byte little-endian length][packet]
//! Maximum frame size: 64 KiB. Zero-length and oversized frames are protocol
//! violations and close the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Maximum allowed packet size inside one frame (64 KiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Framing violation; the connection must be closed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
}

/// Append one length-prefixed frame to `dst`
pub fn write_frame(dst: &mut BytesMut, packet: &[u8]) -> Result<()> {
    if packet.is_empty() {
        return Err(Error::Protocol("Refusing to send an empty frame".into()));
    }
    if packet.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len: packet.len(),
            max: MAX_FRAME_LEN,
        });
    }

    dst.reserve(LENGTH_PREFIX_LEN + packet.len());
    dst.put_u32_le(packet.len() as u32);
    dst.put_slice(packet);
    Ok(())
}

/// Reassembles frames from arbitrarily split stream reads.
///
/// Raw bytes are appended with [`extend`](Self::extend); whole packets are
/// pulled out with [`next_frame`](Self::next_frame). A trailing partial frame
/// stays buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete packet, `Ok(None)` if more bytes are needed.
    ///
    /// The declared length is checked before any space is reserved for it.
    pub fn next_frame(&mut self) -> std::result::Result<Option<Bytes>, FrameError> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_LEN]);
        let len = u32::from_le_bytes(prefix) as usize;

        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        let total = LENGTH_PREFIX_LEN + len;
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
