//! # Xeno Secure
//!
//! A record-layer secure channel over any frame-oriented link: an
//! X25519 ephemeral handshake with an optional stateless-cookie exchange,
//! ChaCha20 record encryption with BLAKE3 keyed MACs and anti-replay,
//! record batching, adaptive record sizing, and vectored sends.
//!
//! The concrete crypto lives behind the [`SecureContext`] capability
//! trait; the channel drives handshake steps through a BIO-style buffer
//! pair and never touches key material directly.

pub mod adaptive;
pub mod batch;
pub mod channel;
pub mod context;
pub mod cookie;
pub mod error;
pub mod handshake;
pub mod keystore;

pub use adaptive::{AdaptiveRecordConfig, AdaptiveRecordSizer};
pub use batch::RecordBatchConfig;
pub use channel::{SecureChannel, SecureChannelConfig};
pub use context::{Bio, HandshakeStatus, SecureContext};
pub use cookie::CookieJar;
pub use error::SecureError;
pub use handshake::{HandshakeRole, XenoContext};
pub use keystore::{KeyStore, StoredKey};
