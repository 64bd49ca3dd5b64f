use super::{CorrectionError, ErrorCoder};

/// Length of the appended checksum.
const CRC_SIZE: usize = 4;

/// Computes the IEEE 802.3 CRC32 (polynomial 0xEDB88320, initial value
/// 0xFFFFFFFF, final XOR 0xFFFFFFFF).
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Detection-only coder: appends a 4-byte little-endian CRC32.
pub struct Crc32Coder;

impl ErrorCoder for Crc32Coder {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + CRC_SIZE);
        out.extend_from_slice(data);
        out.extend_from_slice(&checksum(data).to_le_bytes());
        out
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CorrectionError> {
        if data.len() < CRC_SIZE {
            return Err(CorrectionError::TooShort);
        }
        let (payload, tail) = data.split_at(data.len() - CRC_SIZE);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = checksum(payload);
        if stored != computed {
            return Err(CorrectionError::ChecksumMismatch { stored, computed });
        }
        Ok(payload.to_vec())
    }

    fn can_correct(&self) -> bool {
        false
    }

    fn max_correctable_errors(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "CRC32"
    }
}
