//! # Xeno Negotiate
//!
//! The capability negotiation engine of the XenoComm stack: two agents
//! exchange ranked parameter proposals (data format, compression, error
//! correction, cipher suite) over framed messages until a compatible set
//! is finalized. The finalized set seeds the transmission configuration.
//!
//! Sessions move through a fixed, validated transition table; a wrapper
//! policy bounds every state with timeouts and retries, and a background
//! sweep reaps stale or closed sessions.

pub mod engine;
pub mod error;
pub mod preference;
pub mod session;

pub use engine::{NegotiationConfig, NegotiationEngine, NegotiationResponse};
pub use error::NegotiateError;
pub use preference::{find_best_match, ParameterPreference, RankedOption};
pub use session::{NegotiationState, Session, SessionRole, ALLOWED_TRANSITIONS};
