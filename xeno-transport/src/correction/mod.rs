pub mod crc32;
pub mod reed_solomon;

use thiserror::Error;

pub use crc32::Crc32Coder;
pub use reed_solomon::{ReedSolomonCoder, ReedSolomonConfig, INTERLEAVE_DEPTH};

/// Error detection/correction modes supported by the transmission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCorrectionMode {
    None,
    ChecksumOnly,
    ReedSolomon,
}

/// Failures while decoding a protected payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrectionError {
    #[error("encoded payload shorter than its checksum")]
    TooShort,
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("encoded length {length} does not divide into {shards} equal shards")]
    ShardLayout { length: usize, shards: usize },
    #[error("payload unrecoverable: {0}")]
    Unrecoverable(&'static str),
}

/// Contract shared by all error coders.
///
/// `encode` always succeeds; `decode` either returns the original bytes or
/// reports the payload uncorrectable so the caller can request a
/// retransmission.
pub trait ErrorCoder: Send + Sync {
    fn encode(&self, data: &[u8]) -> Vec<u8>;

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CorrectionError>;

    fn can_correct(&self) -> bool;

    /// Maximum number of unknown-position errors the coder can repair.
    fn max_correctable_errors(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Pass-through coder for the `None` mode.
pub struct PassthroughCoder;

impl ErrorCoder for PassthroughCoder {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CorrectionError> {
        Ok(data.to_vec())
    }

    fn can_correct(&self) -> bool {
        false
    }

    fn max_correctable_errors(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "NONE"
    }
}

/// Builds the coder for a mode. Reed–Solomon parameters come from the
/// transmission configuration.
pub fn build_coder(
    mode: ErrorCorrectionMode,
    rs_config: &ReedSolomonConfig,
) -> Result<Box<dyn ErrorCoder>, crate::error::TransmitError> {
    match mode {
        ErrorCorrectionMode::None => Ok(Box::new(PassthroughCoder)),
        ErrorCorrectionMode::ChecksumOnly => Ok(Box::new(Crc32Coder)),
        ErrorCorrectionMode::ReedSolomon => {
            Ok(Box::new(ReedSolomonCoder::new(rs_config.clone())?))
        }
    }
}
