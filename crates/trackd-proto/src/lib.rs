//! Wire protocol for the trackd daemon.
//!
//! This crate implements the protocol spoken over the daemon's Unix domain
//! socket. It is shared by the server (`trackd-daemon`) and the client
//! library (`trackd-client`) and has no I/O of its own beyond the codec
//! traits.
//!
//! # Protocol Stack
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Requests / Responses / Events     │  (JSON)
//! ├─────────────────────────────────────────┤
//! │               Framing                    │  Length-prefixed
//! ├─────────────────────────────────────────┤
//! │            UDS Transport                 │  Unix socket
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Wire Format
//!
//! Messages use length-prefixed framing:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | UTF-8 JSON       |
//! +----------------------------+------------------+
//! ```
//!
//! - Maximum frame size: 100 MiB, validated before any payload is buffered
//! - Zero-length frames are a protocol error; no valid message is empty
//! - The payload is a JSON [`Request`] (client to server) or a tagged
//!   [`ServerMessage`] (server to client)
//!
//! # Module Overview
//!
//! - [`error`]: Protocol error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`framing`]: Length-prefixed frame codec ([`FrameCodec`])
//! - [`message`]: Message model and fail-closed request parsing

pub mod error;
pub mod framing;
pub mod message;

pub use error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
pub use framing::FrameCodec;
pub use message::{
    EventMessage, JsonMap, Request, Response, ResponseStatus, ServerMessage, fresh_id,
    parse_request, utc_timestamp,
};
