use crate::bytes::{Reader, WireError};

/// Fixed size of the fragment header on the wire.
pub const FRAGMENT_HEADER_SIZE: usize = 22;
/// Fixed size of a fragment acknowledgment frame.
pub const FRAGMENT_ACK_SIZE: usize = 11;

/// Error codes carried in a negative [`FragmentAck`].
pub mod ack_code {
    pub const NONE: u32 = 0;
    pub const CHECKSUM_MISMATCH: u32 = 1;
    pub const UNCORRECTABLE: u32 = 2;
    pub const DECRYPT_FAILED: u32 = 3;
    pub const REASSEMBLY_REJECTED: u32 = 4;
}

/// Header prepended to every fragment of a transmission.
///
/// Total on-wire length of a fragment frame is
/// `FRAGMENT_HEADER_SIZE + fragment_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub transmission_id: u32,
    pub fragment_index: u16,
    pub total_fragments: u16,
    /// Length of the fragment payload as it appears on the wire.
    pub fragment_size: u32,
    /// Total size of the original (pre-fragmentation) payload.
    pub original_size: u32,
    /// CRC32 of the wire payload, or the coder's digest of it.
    pub error_check: u32,
    pub is_encrypted: bool,
    pub security_flags: u8,
}

impl FragmentHeader {
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut out = [0u8; FRAGMENT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.transmission_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.fragment_index.to_le_bytes());
        out[6..8].copy_from_slice(&self.total_fragments.to_le_bytes());
        out[8..12].copy_from_slice(&self.fragment_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.original_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.error_check.to_le_bytes());
        out[20] = self.is_encrypted as u8;
        out[21] = self.security_flags;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAGMENT_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: FRAGMENT_HEADER_SIZE,
                have: buf.len(),
            });
        }
        let mut r = Reader::new(&buf[..FRAGMENT_HEADER_SIZE]);
        Ok(Self {
            transmission_id: r.read_u32()?,
            fragment_index: r.read_u16()?,
            total_fragments: r.read_u16()?,
            fragment_size: r.read_u32()?,
            original_size: r.read_u32()?,
            error_check: r.read_u32()?,
            is_encrypted: r.read_u8()? != 0,
            security_flags: r.read_u8()?,
        })
    }

    /// Builds a complete fragment frame: header followed by payload.
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        debug_assert_eq!(payload.len() as u32, self.fragment_size);
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_SIZE + payload.len());
        out.extend_from_slice(&self.encode());
        out.extend_from_slice(payload);
        out
    }

    /// Splits a received frame into header and payload, verifying the
    /// declared payload length against the frame length.
    pub fn split_frame(frame: &[u8]) -> Result<(Self, &[u8]), WireError> {
        let header = Self::decode(frame)?;
        let payload = &frame[FRAGMENT_HEADER_SIZE..];
        if payload.len() != header.fragment_size as usize {
            return Err(WireError::LengthMismatch {
                declared: header.fragment_size as usize,
                actual: payload.len(),
            });
        }
        Ok((header, payload))
    }
}

/// Per-fragment acknowledgment, positive or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentAck {
    pub transmission_id: u32,
    pub fragment_index: u16,
    pub success: bool,
    pub error_code: u32,
}

impl FragmentAck {
    pub fn ok(transmission_id: u32, fragment_index: u16) -> Self {
        Self {
            transmission_id,
            fragment_index,
            success: true,
            error_code: ack_code::NONE,
        }
    }

    pub fn failed(transmission_id: u32, fragment_index: u16, error_code: u32) -> Self {
        Self {
            transmission_id,
            fragment_index,
            success: false,
            error_code,
        }
    }

    pub fn encode(&self) -> [u8; FRAGMENT_ACK_SIZE] {
        let mut out = [0u8; FRAGMENT_ACK_SIZE];
        out[0..4].copy_from_slice(&self.transmission_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.fragment_index.to_le_bytes());
        out[6] = self.success as u8;
        out[7..11].copy_from_slice(&self.error_code.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != FRAGMENT_ACK_SIZE {
            return Err(WireError::LengthMismatch {
                declared: FRAGMENT_ACK_SIZE,
                actual: buf.len(),
            });
        }
        let mut r = Reader::new(buf);
        Ok(Self {
            transmission_id: r.read_u32()?,
            fragment_index: r.read_u16()?,
            success: r.read_u8()? != 0,
            error_code: r.read_u32()?,
        })
    }
}
