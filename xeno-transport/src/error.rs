use crate::correction::CorrectionError;
use std::time::Duration;
use thiserror::Error;
use xeno_secure::SecureError;
use xeno_wire::{LinkError, WireError};

/// Errors surfaced by the transmission layer.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("payload of {size} bytes needs {needed} fragments, exceeding the limit of {max}")]
    TooManyFragments {
        size: usize,
        needed: usize,
        max: u32,
    },
    #[error("window space wait timeout after {0:?}")]
    WindowTimeout(Duration),
    #[error("no acknowledgment for transmission {transmission_id} fragment {fragment_index} within {timeout:?}")]
    AckTimeout {
        transmission_id: u32,
        fragment_index: u16,
        timeout: Duration,
    },
    #[error("transmission {transmission_id} fragment {fragment_index} failed after {attempts} attempts")]
    MaxRetriesReached {
        transmission_id: u32,
        fragment_index: u16,
        attempts: u32,
    },
    #[error("receive timed out after {0:?}")]
    ReceiveTimeout(Duration),
    #[error("reassembly buffer budget exhausted")]
    BufferExhausted,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("encryption required but no established secure channel")]
    EncryptionRequired,
    #[error("error correction failed: {0}")]
    Correction(#[from] CorrectionError),
    #[error("security failure: {0}")]
    Security(#[from] SecureError),
    #[error("link failure: {0}")]
    Link(#[from] LinkError),
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
}

impl TransmitError {
    /// Short stable tag for feedback records and error-frequency tables.
    pub fn tag(&self) -> &'static str {
        match self {
            TransmitError::InvalidConfig(_) => "invalid_config",
            TransmitError::TooManyFragments { .. } => "too_many_fragments",
            TransmitError::WindowTimeout(_) => "window_timeout",
            TransmitError::AckTimeout { .. } => "ack_timeout",
            TransmitError::MaxRetriesReached { .. } => "max_retries",
            TransmitError::ReceiveTimeout(_) => "receive_timeout",
            TransmitError::BufferExhausted => "buffer_exhausted",
            TransmitError::Protocol(_) => "protocol",
            TransmitError::EncryptionRequired => "encryption_required",
            TransmitError::Correction(_) => "uncorrectable",
            TransmitError::Security(_) => "crypto",
            TransmitError::Link(_) => "link",
            TransmitError::Wire(_) => "wire",
        }
    }
}
