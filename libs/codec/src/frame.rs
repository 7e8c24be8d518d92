//! # Length-Prefixed Framing
//!
//! Every message on the gateway socket is `u32_be(len) || bytes[len]`. The
//! transport hands us arbitrary chunks of the byte stream; [`FrameDecoder`]
//! carries partial state across chunks and only ever releases complete
//! frames.
//!
//! ```text
//! chunk 1: [00 00 00 0a | 01 02]            -> 0 frames, 2 bytes stashed, expect 10
//! chunk 2: [03 .. 0a | 00 00 00 0e | 01 02] -> frame #1, 2 bytes stashed, expect 14
//! chunk 3: [03 .. 0e]                       -> frame #2
//! ```
//!
//! The length header itself may be split across chunks; it is not consumed
//! until all four bytes are present.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefix `payload` with its big-endian u32 length
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    encode_frame_into(payload, &mut buf);
    buf.freeze()
}

/// Append a length-prefixed frame to an existing buffer
pub fn encode_frame_into(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
}

/// Stateful reassembler for the inbound byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes received but not yet released as a frame
    buffer: BytesMut,
    /// Length of the frame currently being assembled, once its header is read
    expected_len: Option<usize>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            expected_len: None,
            max_frame_size,
        }
    }

    /// Feed one chunk and collect every frame it completes, in order
    ///
    /// Returns an error only when a length header exceeds `max_frame_size`.
    /// Frames completed earlier in the same chunk are lost in that case, but
    /// the stream is unusable from that point anyway; state is reset.
    pub fn decode(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<Bytes>> {
        let mut frames = Vec::new();
        self.decode_with(chunk, |frame| frames.push(frame))?;
        Ok(frames)
    }

    /// Feed one chunk, handing each completed frame to `on_frame` as soon as
    /// it is complete
    pub fn decode_with<F>(&mut self, chunk: &[u8], mut on_frame: F) -> ProtocolResult<usize>
    where
        F: FnMut(Bytes),
    {
        self.buffer.extend_from_slice(chunk);
        let mut emitted = 0;

        loop {
            let expected = match self.expected_len {
                Some(len) => len,
                None => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        break;
                    }
                    let len = self.buffer.get_u32() as usize;
                    if len > self.max_frame_size {
                        self.reset();
                        return Err(ProtocolError::frame_too_large(len, self.max_frame_size));
                    }
                    self.expected_len = Some(len);
                    len
                }
            };

            if self.buffer.len() < expected {
                break;
            }

            let frame = self.buffer.split_to(expected).freeze();
            self.expected_len = None;
            emitted += 1;
            on_frame(frame);
        }

        if !self.buffer.is_empty() || self.expected_len.is_some() {
            debug!(
                buffered = self.buffer.len(),
                expected = ?self.expected_len,
                "Partial frame carried over"
            );
        }

        Ok(emitted)
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Declared length of the frame in progress, if its header has arrived
    pub fn expected_len(&self) -> Option<usize> {
        self.expected_len
    }

    /// Drop any partial state, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = None;
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
