use std::time::Duration;
use thiserror::Error;
use xeno_wire::LinkError;

/// Errors raised by the secure channel.
///
/// Any record-layer failure on an established channel
/// ([`SecureError::BadRecordMac`], [`SecureError::Replay`],
/// [`SecureError::MalformedRecord`]) is fatal for that channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecureError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("channel not established")]
    NotEstablished,
    #[error("record MAC verification failed")]
    BadRecordMac,
    #[error("replayed or stale record sequence {0}")]
    Replay(u64),
    #[error("malformed record: {0}")]
    MalformedRecord(&'static str),
    #[error("channel closed by peer")]
    Closed,
    #[error("unexpected frame type {0} on established channel")]
    UnexpectedFrame(u8),
    #[error("invalid handshake cookie")]
    CookieInvalid,
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}
