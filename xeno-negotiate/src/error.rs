use crate::session::NegotiationState;
use std::time::Duration;
use thiserror::Error;
use xeno_wire::{LinkError, ParamsError, WireError};

/// Errors raised by the negotiation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiateError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid parameter combination: {0}")]
    Params(#[from] ParamsError),
    #[error("unknown session {0}")]
    UnknownSession(u64),
    #[error("duplicate session id {0}")]
    DuplicateSession(u64),
    #[error("session {session}: transition {from:?} -> {to:?} not permitted")]
    InvalidTransition {
        session: u64,
        from: NegotiationState,
        to: NegotiationState,
    },
    #[error("session {session} is in state {state:?}, expected {expected:?}")]
    WrongState {
        session: u64,
        state: NegotiationState,
        expected: NegotiationState,
    },
    #[error("no parameter set compatible with remote capabilities: {0}")]
    NoCompatibleParams(String),
    #[error("fallback attempts exhausted after {0} counter-proposals")]
    FallbackExhausted(u32),
    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("link failure: {0}")]
    Link(#[from] LinkError),
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
}
