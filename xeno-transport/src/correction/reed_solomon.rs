use super::{CorrectionError, ErrorCoder};
use crate::error::TransmitError;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Interleaving depth for burst-error dispersal.
pub const INTERLEAVE_DEPTH: usize = 16;

/// Bytes reserved at the tail of the padded data region for the original
/// payload length.
const SIZE_TAIL: usize = 8;

/// Shard layouts at or below this size also get a pairwise corrupt-shard
/// search; larger layouts stay with the linear single-shard search.
const PAIR_SEARCH_LIMIT: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReedSolomonConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub interleave: bool,
}

impl Default for ReedSolomonConfig {
    fn default() -> Self {
        Self {
            data_shards: 223,
            parity_shards: 32,
            interleave: true,
        }
    }
}

/// Reed–Solomon coder over GF(2⁸) shards.
///
/// Layout: the payload plus a little-endian `u64` size tail is padded to
/// `data_shards` equal shards (optionally interleaved first), parity
/// shards are appended, and everything is concatenated data-first.
pub struct ReedSolomonCoder {
    config: ReedSolomonConfig,
    codec: ReedSolomon,
}

fn interleave(data: &[u8], depth: usize) -> Vec<u8> {
    let cols = data.len() / depth;
    let mut out = vec![0u8; data.len()];
    for row in 0..depth {
        for col in 0..cols {
            out[col * depth + row] = data[row * cols + col];
        }
    }
    out
}

fn deinterleave(data: &[u8], depth: usize) -> Vec<u8> {
    let cols = data.len() / depth;
    let mut out = vec![0u8; data.len()];
    for row in 0..depth {
        for col in 0..cols {
            out[row * cols + col] = data[col * depth + row];
        }
    }
    out
}

impl ReedSolomonCoder {
    pub fn new(config: ReedSolomonConfig) -> Result<Self, TransmitError> {
        let codec = ReedSolomon::new(config.data_shards, config.parity_shards).map_err(|e| {
            TransmitError::InvalidConfig(format!(
                "reed-solomon {}+{}: {e:?}",
                config.data_shards, config.parity_shards
            ))
        })?;
        Ok(Self { config, codec })
    }

    pub fn config(&self) -> &ReedSolomonConfig {
        &self.config
    }

    fn shard_size_for(&self, payload_len: usize) -> usize {
        let k = self.config.data_shards;
        let body = payload_len + SIZE_TAIL;
        let mut shard_size = body.div_ceil(k).max(1);
        if self.config.interleave {
            while (k * shard_size) % INTERLEAVE_DEPTH != 0 {
                shard_size += 1;
            }
        }
        shard_size
    }

    fn split_shards(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, CorrectionError> {
        let total = self.config.data_shards + self.config.parity_shards;
        if data.is_empty() || data.len() % total != 0 {
            return Err(CorrectionError::ShardLayout {
                length: data.len(),
                shards: total,
            });
        }
        let shard_size = data.len() / total;
        if self.config.interleave
            && (self.config.data_shards * shard_size) % INTERLEAVE_DEPTH != 0
        {
            return Err(CorrectionError::ShardLayout {
                length: data.len(),
                shards: total,
            });
        }
        Ok(data.chunks(shard_size).map(<[u8]>::to_vec).collect())
    }

    fn shards_consistent(&self, shards: &[Vec<u8>]) -> bool {
        self.codec.verify(shards).unwrap_or(false)
    }

    /// Locates corrupt shards by hypothesis: mark a candidate set missing,
    /// reconstruct from the rest, and accept the first repair whose parity
    /// verifies.
    ///
    /// A hypothesis of `e` shards leaves `parity - e` redundant checks, so
    /// searches stay within the classical bound `2e <= parity`; below it a
    /// wrong repair could verify.
    fn locate_and_repair(&self, shards: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CorrectionError> {
        let total = shards.len();

        if self.config.parity_shards >= 2 {
            for corrupt in 0..total {
                if let Some(repaired) = self.try_hypothesis(&shards, &[corrupt]) {
                    tracing::debug!("reed-solomon repaired corrupt shard {corrupt}");
                    return Ok(repaired);
                }
            }
        }

        if total <= PAIR_SEARCH_LIMIT && self.config.parity_shards >= 4 {
            for first in 0..total {
                for second in first + 1..total {
                    if let Some(repaired) = self.try_hypothesis(&shards, &[first, second]) {
                        tracing::debug!(
                            "reed-solomon repaired corrupt shards {first} and {second}"
                        );
                        return Ok(repaired);
                    }
                }
            }
        }

        Err(CorrectionError::Unrecoverable(
            "no corrupt-shard hypothesis verified",
        ))
    }

    fn try_hypothesis(&self, shards: &[Vec<u8>], missing: &[usize]) -> Option<Vec<Vec<u8>>> {
        let mut candidate: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        for &index in missing {
            candidate[index] = None;
        }
        self.codec.reconstruct(&mut candidate).ok()?;
        let rebuilt: Vec<Vec<u8>> = candidate.into_iter().flatten().collect();
        if rebuilt.len() == shards.len() && self.shards_consistent(&rebuilt) {
            Some(rebuilt)
        } else {
            None
        }
    }

    fn extract_payload(&self, data_shards: &[Vec<u8>]) -> Result<Vec<u8>, CorrectionError> {
        let mut region: Vec<u8> = data_shards.concat();
        if self.config.interleave {
            region = deinterleave(&region, INTERLEAVE_DEPTH);
        }
        if region.len() < SIZE_TAIL {
            return Err(CorrectionError::Unrecoverable("data region too small"));
        }
        let tail = &region[region.len() - SIZE_TAIL..];
        let original = u64::from_le_bytes([
            tail[0], tail[1], tail[2], tail[3], tail[4], tail[5], tail[6], tail[7],
        ]) as usize;
        if original > region.len() - SIZE_TAIL {
            return Err(CorrectionError::Unrecoverable("size tail out of range"));
        }
        region.truncate(original);
        Ok(region)
    }

    /// Recovers up to `parity_shards` erasures at known shard positions,
    /// the full capability of the shard code.
    pub fn decode_with_erasures(
        &self,
        data: &[u8],
        missing_shards: &[usize],
    ) -> Result<Vec<u8>, CorrectionError> {
        if missing_shards.len() > self.config.parity_shards {
            return Err(CorrectionError::Unrecoverable(
                "more erasures than parity shards",
            ));
        }
        let shards = self.split_shards(data)?;
        let total = shards.len();
        if missing_shards.iter().any(|&i| i >= total) {
            return Err(CorrectionError::Unrecoverable("erasure index out of range"));
        }

        let mut candidate: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        for &index in missing_shards {
            candidate[index] = None;
        }
        self.codec
            .reconstruct(&mut candidate)
            .map_err(|_| CorrectionError::Unrecoverable("erasure reconstruction failed"))?;
        let rebuilt: Vec<Vec<u8>> = candidate.into_iter().flatten().collect();
        self.extract_payload(&rebuilt[..self.config.data_shards])
    }
}

impl ErrorCoder for ReedSolomonCoder {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        let k = self.config.data_shards;
        let shard_size = self.shard_size_for(data.len());
        let region = k * shard_size;

        let mut buf = vec![0u8; region];
        buf[..data.len()].copy_from_slice(data);
        buf[region - SIZE_TAIL..].copy_from_slice(&(data.len() as u64).to_le_bytes());
        if self.config.interleave {
            buf = interleave(&buf, INTERLEAVE_DEPTH);
        }

        let mut shards: Vec<Vec<u8>> = buf.chunks(shard_size).map(<[u8]>::to_vec).collect();
        shards.extend(std::iter::repeat_with(|| vec![0u8; shard_size]).take(self.config.parity_shards));
        // Cannot fail: shard counts and sizes match the codec by construction.
        self.codec
            .encode(&mut shards)
            .expect("parity generation over well-formed shards");
        shards.concat()
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CorrectionError> {
        let shards = self.split_shards(data)?;
        let shards = if self.shards_consistent(&shards) {
            shards
        } else {
            self.locate_and_repair(shards)?
        };
        self.extract_payload(&shards[..self.config.data_shards])
    }

    fn can_correct(&self) -> bool {
        true
    }

    fn max_correctable_errors(&self) -> usize {
        self.config.parity_shards / 2
    }

    fn name(&self) -> &'static str {
        "Reed-Solomon"
    }
}
