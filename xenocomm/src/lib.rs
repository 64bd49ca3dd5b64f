//! # XenoComm
//!
//! An agent-to-agent communication substrate built as a layered
//! reliable-transport stack:
//!
//! - [`xeno_negotiate`] agrees on a parameter set (format, compression,
//!   error correction, cipher suite) through a two-party handshake.
//! - [`xeno_secure`] provides the record layer: an X25519/ChaCha20/BLAKE3
//!   secure channel with cookies, batching, and adaptive record sizing.
//! - [`xeno_transport`] fragments, protects, admits, transmits, and
//!   retransmits payloads under sliding-window flow control.
//! - [`xeno_feedback`] observes outcomes and adapts the transmission
//!   configuration to measured performance.
//!
//! This crate ties the layers together: a finalized negotiation seeds the
//! transmission configuration via [`params_to_config`].

pub use xeno_feedback as feedback;
pub use xeno_negotiate as negotiate;
pub use xeno_secure as secure;
pub use xeno_transport as transport;
pub use xeno_wire as wire;

pub use xeno_feedback::{FeedbackConfig, FeedbackStore, StrategyAdapter};
pub use xeno_negotiate::{NegotiationConfig, NegotiationEngine, ParameterPreference};
pub use xeno_secure::{KeyStore, SecureChannel, SecureChannelConfig};
pub use xeno_transport::{TransmissionConfig, TransmissionManager};
pub use xeno_wire::{NegotiableParams, Transport};

use xeno_transport::ErrorCorrectionMode;
use xeno_wire::{Cipher, ErrorCorrectionScheme};

/// Derives the initial transmission configuration from a finalized
/// parameter set, starting from `base` for everything the negotiation
/// does not cover.
pub fn params_to_config(
    params: &NegotiableParams,
    base: TransmissionConfig,
) -> TransmissionConfig {
    let mut config = base;
    config.error_correction = match params.error_correction {
        ErrorCorrectionScheme::None => ErrorCorrectionMode::None,
        ErrorCorrectionScheme::ChecksumOnly => ErrorCorrectionMode::ChecksumOnly,
        ErrorCorrectionScheme::ReedSolomon => ErrorCorrectionMode::ReedSolomon,
    };
    let encrypted = params.cipher != Cipher::None;
    config.security.enable_encryption = encrypted;
    config.security.require_encryption = encrypted;
    tracing::debug!(
        "seeded transmission config from negotiated parameters ({:?}, {:?})",
        params.error_correction,
        params.cipher
    );
    config
}
