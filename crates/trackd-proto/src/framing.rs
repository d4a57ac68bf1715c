//! Length-prefixed frame codec.
//!
//! Frames are a 4-byte unsigned big-endian length followed by exactly that
//! many payload bytes. The codec is payload-agnostic; JSON interpretation
//! happens in [`crate::message`].
//!
//! # Partial Reads
//!
//! [`FrameCodec`] is a [`Decoder`] state machine: the transport may deliver
//! the header and body in arbitrarily small pieces and the codec accumulates
//! until a full frame is available. A peer that closes mid-header is treated
//! as a clean EOF; a peer that closes mid-body is a truncation error.
//!
//! # Safety
//!
//! The declared length is validated against [`MAX_FRAME_SIZE`] before any
//! buffer space is reserved for the body, so an oversized declaration is
//! rejected without buffering the claimed payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{MAX_FRAME_SIZE, ProtocolError};

/// Length of the frame header in bytes.
const HEADER_LEN: usize = 4;

/// Codec for length-prefixed frames over a byte stream.
///
/// Used with [`tokio_util::codec::Framed`] to turn a `UnixStream` into a
/// `Sink<Bytes>` + `Stream<Item = Result<Bytes, ProtocolError>>`.
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the 4-byte length prefix.
    #[default]
    Header,
    /// Header consumed; waiting for a body of this many bytes.
    Body(usize),
}

impl FrameCodec {
    /// Create a new codec in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    let mut header = [0u8; HEADER_LEN];
                    header.copy_from_slice(&src[..HEADER_LEN]);
                    let declared = u32::from_be_bytes(header);

                    if declared == 0 {
                        return Err(ProtocolError::EmptyFrame);
                    }
                    if declared > MAX_FRAME_SIZE {
                        return Err(ProtocolError::FrameTooLarge {
                            declared: u64::from(declared),
                        });
                    }

                    src.advance(HEADER_LEN);
                    self.state = DecodeState::Body(declared as usize);
                },
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }

                    let payload = src.split_to(len).freeze();
                    self.state = DecodeState::Header;
                    return Ok(Some(payload));
                },
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            // A short header read means the peer simply hung up between
            // messages: clean EOF, not an error.
            DecodeState::Header => Ok(None),
            DecodeState::Body(_) => Err(ProtocolError::Truncated),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if item.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        let len = u32::try_from(item.len()).map_err(|_| ProtocolError::FrameTooLarge {
            declared: item.len() as u64,
        })?;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                declared: u64::from(len),
            });
        }

        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(len);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
