use crate::error::NegotiateError;
use std::collections::BTreeMap;
use xeno_wire::{
    AuthMethod, CapabilitySet, Cipher, Compression, DataFormat, ErrorCorrectionScheme,
    KeyExchange, KeySize, NegotiableParams,
};

/// A candidate value with its preference rank (lower is more preferred),
/// an optional hard requirement, and ordered fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedOption<T> {
    pub value: T,
    pub rank: u8,
    pub required: bool,
    pub fallbacks: Vec<T>,
}

impl<T: Copy + Eq> RankedOption<T> {
    pub fn new(value: T, rank: u8) -> Self {
        Self {
            value,
            rank,
            required: false,
            fallbacks: Vec::new(),
        }
    }

    pub fn required(value: T, rank: u8) -> Self {
        Self {
            value,
            rank,
            required: true,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(value: T, rank: u8, fallbacks: Vec<T>) -> Self {
        Self {
            value,
            rank,
            required: false,
            fallbacks,
        }
    }

    /// True when the option itself or one of its fallbacks appears in the
    /// remote list.
    fn satisfiable(&self, remote: &[T]) -> bool {
        remote.contains(&self.value) || self.fallbacks.iter().any(|f| remote.contains(f))
    }
}

/// Ranked preferences for every negotiable parameter class.
#[derive(Debug, Clone, Default)]
pub struct ParameterPreference {
    pub data_formats: Vec<RankedOption<DataFormat>>,
    pub compressions: Vec<RankedOption<Compression>>,
    pub error_corrections: Vec<RankedOption<ErrorCorrectionScheme>>,
    pub ciphers: Vec<RankedOption<Cipher>>,
    pub key_exchanges: Vec<RankedOption<KeyExchange>>,
    pub auth_methods: Vec<RankedOption<AuthMethod>>,
    pub key_sizes: Vec<RankedOption<KeySize>>,
    pub custom: BTreeMap<String, Vec<RankedOption<String>>>,
}

/// Best match between local ranked options and a remote capability list:
/// options are tried in rank order, each value before its fallbacks.
pub fn find_best_match<T: Copy + Eq>(local: &[RankedOption<T>], remote: &[T]) -> Option<T> {
    let mut ordered: Vec<&RankedOption<T>> = local.iter().collect();
    ordered.sort_by_key(|option| option.rank);
    for option in &ordered {
        if remote.contains(&option.value) {
            return Some(option.value);
        }
        for fallback in &option.fallbacks {
            if remote.contains(fallback) {
                return Some(*fallback);
            }
        }
    }
    None
}

/// All mutually-supported values of one class, in preference order (each
/// option's value before its fallbacks, options by rank), paired with the
/// rank of the option that contributed them.
fn ranked_candidates<T: Copy + Eq>(
    class: &'static str,
    local: &[RankedOption<T>],
    remote: &[T],
    default: T,
) -> Result<Vec<(u32, T)>, NegotiateError> {
    for option in local {
        if option.required && !option.satisfiable(remote) {
            return Err(NegotiateError::NoCompatibleParams(format!(
                "required {class} option unavailable remotely"
            )));
        }
    }
    if local.is_empty() {
        return Ok(vec![(0, default)]);
    }
    let mut ordered: Vec<&RankedOption<T>> = local.iter().collect();
    ordered.sort_by_key(|option| option.rank);
    let mut candidates: Vec<(u32, T)> = Vec::new();
    for option in ordered {
        for value in std::iter::once(&option.value).chain(option.fallbacks.iter()) {
            if remote.contains(value) && !candidates.iter().any(|(_, seen)| seen == value) {
                candidates.push((option.rank as u32, *value));
            }
        }
    }
    if candidates.is_empty() {
        return Err(NegotiateError::NoCompatibleParams(format!(
            "no shared {class} option"
        )));
    }
    Ok(candidates)
}

impl ParameterPreference {
    /// The capabilities this side can advertise: every option value plus
    /// its fallbacks, per class.
    pub fn capability_set(&self) -> CapabilitySet {
        fn flatten<T: Copy + Eq>(options: &[RankedOption<T>]) -> Vec<T> {
            let mut out: Vec<T> = Vec::new();
            for option in options {
                if !out.contains(&option.value) {
                    out.push(option.value);
                }
                for fallback in &option.fallbacks {
                    if !out.contains(fallback) {
                        out.push(*fallback);
                    }
                }
            }
            out
        }
        CapabilitySet {
            data_formats: flatten(&self.data_formats),
            compressions: flatten(&self.compressions),
            error_corrections: flatten(&self.error_corrections),
            ciphers: flatten(&self.ciphers),
            key_exchanges: flatten(&self.key_exchanges),
            auth_methods: flatten(&self.auth_methods),
            key_sizes: flatten(&self.key_sizes),
        }
    }

    fn chosen_custom(&self) -> BTreeMap<String, String> {
        let mut custom = BTreeMap::new();
        for (key, options) in &self.custom {
            if let Some(best) = options.iter().min_by_key(|option| option.rank) {
                custom.insert(key.clone(), best.value.clone());
            }
        }
        custom
    }

    /// The locally optimal parameter set, ignoring any remote peer.
    ///
    /// Selection runs against this side's own capabilities, so a
    /// top-ranked cipher that conflicts with the top-ranked key size
    /// still resolves to the best jointly valid combination.
    pub fn create_optimal(&self) -> Result<NegotiableParams, NegotiateError> {
        self.build_compatible(&self.capability_set())
    }

    /// The best parameter set compatible with the remote capabilities,
    /// honoring ranks, fallbacks, and required flags.
    ///
    /// The independent classes take their best match outright. The
    /// security classes interact (AES and ChaCha20 pin key sizes, ECDH
    /// curves pin key sizes, encryption demands a key exchange), so
    /// cipher, key exchange, and key size are chosen jointly: the valid
    /// combination with the lowest combined rank wins, ties broken by
    /// the lexicographic parameter tuple.
    pub fn build_compatible(
        &self,
        remote: &CapabilitySet,
    ) -> Result<NegotiableParams, NegotiateError> {
        let defaults = NegotiableParams::default();
        let data_formats = ranked_candidates(
            "data format",
            &self.data_formats,
            &remote.data_formats,
            defaults.data_format,
        )?;
        let compressions = ranked_candidates(
            "compression",
            &self.compressions,
            &remote.compressions,
            defaults.compression,
        )?;
        let error_corrections = ranked_candidates(
            "error correction",
            &self.error_corrections,
            &remote.error_corrections,
            defaults.error_correction,
        )?;
        let auth_methods = ranked_candidates(
            "authentication",
            &self.auth_methods,
            &remote.auth_methods,
            defaults.auth_method,
        )?;
        let ciphers =
            ranked_candidates("cipher", &self.ciphers, &remote.ciphers, defaults.cipher)?;
        let key_exchanges = ranked_candidates(
            "key exchange",
            &self.key_exchanges,
            &remote.key_exchanges,
            defaults.key_exchange,
        )?;
        let key_sizes = ranked_candidates(
            "key size",
            &self.key_sizes,
            &remote.key_sizes,
            defaults.key_size,
        )?;

        let base = NegotiableParams {
            data_format: data_formats[0].1,
            compression: compressions[0].1,
            error_correction: error_corrections[0].1,
            auth_method: auth_methods[0].1,
            custom: self.chosen_custom(),
            ..defaults
        };

        let mut best: Option<(u32, NegotiableParams)> = None;
        for (cipher_rank, cipher) in &ciphers {
            for (kx_rank, key_exchange) in &key_exchanges {
                for (size_rank, key_size) in &key_sizes {
                    let mut candidate = base.clone();
                    candidate.cipher = *cipher;
                    candidate.key_exchange = *key_exchange;
                    candidate.key_size = *key_size;
                    if candidate.validate().is_err() {
                        continue;
                    }
                    let rank_sum = cipher_rank + kx_rank + size_rank;
                    let better = match &best {
                        None => true,
                        Some((best_rank, best_params)) => {
                            (rank_sum, candidate.ordering_key())
                                < (*best_rank, best_params.ordering_key())
                        }
                    };
                    if better {
                        best = Some((rank_sum, candidate));
                    }
                }
            }
        }
        best.map(|(_, params)| params).ok_or_else(|| {
            NegotiateError::NoCompatibleParams(
                "no jointly valid cipher, key-exchange, and key-size combination".to_string(),
            )
        })
    }

    /// True when a proposal uses only values this side offers and the
    /// combination passes the compatibility table.
    pub fn is_compatible(&self, params: &NegotiableParams) -> bool {
        fn listed<T: Copy + Eq>(options: &[RankedOption<T>], value: T) -> bool {
            options.is_empty() || options.iter().any(|option| option.value == value)
        }
        listed(&self.data_formats, params.data_format)
            && listed(&self.compressions, params.compression)
            && listed(&self.error_corrections, params.error_correction)
            && listed(&self.ciphers, params.cipher)
            && listed(&self.key_exchanges, params.key_exchange)
            && listed(&self.auth_methods, params.auth_method)
            && listed(&self.key_sizes, params.key_size)
            && params.validate().is_ok()
    }

    /// Weighted-rank score of a proposal against these preferences; lower
    /// is better. Values absent from a class contribute nothing.
    pub fn score(&self, params: &NegotiableParams) -> u32 {
        fn rank_of<T: Copy + Eq>(options: &[RankedOption<T>], value: T) -> u32 {
            options
                .iter()
                .find(|option| option.value == value)
                .map(|option| option.rank as u32)
                .unwrap_or(0)
        }
        rank_of(&self.data_formats, params.data_format)
            + rank_of(&self.compressions, params.compression)
            + rank_of(&self.error_corrections, params.error_correction)
            + rank_of(&self.ciphers, params.cipher)
            + rank_of(&self.key_exchanges, params.key_exchange)
            + rank_of(&self.auth_methods, params.auth_method)
            + rank_of(&self.key_sizes, params.key_size)
    }

    /// Alternative proposals after a rejection: single-class substitutions
    /// of the best compatible set, ordered by score with a lexicographic
    /// tie-break, excluding the rejected set itself.
    pub fn generate_alternatives(
        &self,
        rejected: &NegotiableParams,
        remote: &CapabilitySet,
        max_alternatives: usize,
    ) -> Vec<NegotiableParams> {
        let base = match self.build_compatible(remote) {
            Ok(base) => base,
            Err(_) => return Vec::new(),
        };

        let mut candidates: Vec<NegotiableParams> = Vec::new();
        let mut push = |candidate: NegotiableParams| {
            if &candidate != rejected
                && candidate.validate().is_ok()
                && remote.contains_params(&candidate)
                && !candidates.contains(&candidate)
            {
                candidates.push(candidate);
            }
        };

        fn preferred_values<T: Copy + Eq>(
            options: &[RankedOption<T>],
            remote: &[T],
        ) -> Vec<T> {
            let mut values = Vec::new();
            for option in options {
                for value in std::iter::once(&option.value).chain(option.fallbacks.iter()) {
                    if remote.contains(value) && !values.contains(value) {
                        values.push(*value);
                    }
                }
            }
            values
        }

        push(base.clone());
        for format in preferred_values(&self.data_formats, &remote.data_formats) {
            let mut candidate = base.clone();
            candidate.data_format = format;
            push(candidate);
        }
        for compression in preferred_values(&self.compressions, &remote.compressions) {
            let mut candidate = base.clone();
            candidate.compression = compression;
            push(candidate);
        }
        for correction in preferred_values(&self.error_corrections, &remote.error_corrections) {
            let mut candidate = base.clone();
            candidate.error_correction = correction;
            push(candidate);
        }

        candidates.sort_by_key(|candidate| (self.score(candidate), candidate.ordering_key()));
        candidates.truncate(max_alternatives);
        candidates
    }
}
