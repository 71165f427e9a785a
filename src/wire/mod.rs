//! BEP-3 peer wire protocol: handshake, message framing, and the
//! tokio-codec glue that turns a `TcpStream` into a stream of [`Message`]s.

pub mod codec;
pub mod handshake;
pub mod message;

pub use codec::MessageCodec;
pub use handshake::Handshake;
pub use message::Message;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid protocol identifier in handshake")]
    InvalidProtocol,

    #[error("handshake info_hash mismatch")]
    InfoHashMismatch,

    #[error("unknown message id {0}")]
    UnknownMessageId(u8),

    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: &'static str },

    #[error("handshake timed out")]
    Timeout,
}

pub type WireResult<T> = Result<T, WireError>;
