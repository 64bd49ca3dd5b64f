use crate::error::NegotiateError;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use xeno_wire::{CapabilitySet, NegotiableParams};

/// States of a negotiation session, covering both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    // Initiator side
    Initiating,
    AwaitingResponse,
    CounterReceived,
    Finalizing,
    // Responder side
    ProposalReceived,
    Responding,
    AwaitingFinalization,
    // Shared terminals
    Finalized,
    Failed,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NegotiationState::Finalized | NegotiationState::Failed | NegotiationState::Closed
        )
    }
}

/// The fixed transition table. Any pair outside this list is a contract
/// violation and forces the session into `Failed`.
pub const ALLOWED_TRANSITIONS: &[(NegotiationState, NegotiationState)] = &[
    (NegotiationState::Idle, NegotiationState::Initiating),
    (NegotiationState::Idle, NegotiationState::ProposalReceived),
    (NegotiationState::Initiating, NegotiationState::AwaitingResponse),
    (NegotiationState::Initiating, NegotiationState::Failed),
    (NegotiationState::AwaitingResponse, NegotiationState::CounterReceived),
    (NegotiationState::AwaitingResponse, NegotiationState::Finalizing),
    (NegotiationState::AwaitingResponse, NegotiationState::Failed),
    (NegotiationState::CounterReceived, NegotiationState::Finalizing),
    (NegotiationState::CounterReceived, NegotiationState::Failed),
    (NegotiationState::Finalizing, NegotiationState::Finalized),
    (NegotiationState::Finalizing, NegotiationState::Failed),
    (NegotiationState::ProposalReceived, NegotiationState::Responding),
    (NegotiationState::ProposalReceived, NegotiationState::Failed),
    (NegotiationState::Responding, NegotiationState::AwaitingFinalization),
    (NegotiationState::Responding, NegotiationState::Failed),
    (NegotiationState::AwaitingFinalization, NegotiationState::Finalized),
    (NegotiationState::AwaitingFinalization, NegotiationState::Failed),
    (NegotiationState::Finalized, NegotiationState::Closed),
    (NegotiationState::Failed, NegotiationState::Closed),
    // Explicit close is allowed from any live state.
    (NegotiationState::Idle, NegotiationState::Closed),
    (NegotiationState::Initiating, NegotiationState::Closed),
    (NegotiationState::AwaitingResponse, NegotiationState::Closed),
    (NegotiationState::CounterReceived, NegotiationState::Closed),
    (NegotiationState::Finalizing, NegotiationState::Closed),
    (NegotiationState::ProposalReceived, NegotiationState::Closed),
    (NegotiationState::Responding, NegotiationState::Closed),
    (NegotiationState::AwaitingFinalization, NegotiationState::Closed),
];

pub fn transition_allowed(from: NegotiationState, to: NegotiationState) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// One negotiation session, owned by the engine's session table.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub role: SessionRole,
    pub target: String,
    pub state: NegotiationState,
    pub created_at: Instant,
    pub state_entered_at: Instant,
    /// When each state was first entered, for diagnostics and sweeps.
    pub entered: HashMap<NegotiationState, Instant>,
    pub retry_count: u32,
    pub initial_proposal: Option<NegotiableParams>,
    pub last_counter: Option<NegotiableParams>,
    pub agreed: Option<NegotiableParams>,
    pub remote_caps: Option<CapabilitySet>,
    /// Proposals already tried, to keep counter loops from cycling.
    pub tried: HashSet<NegotiableParams>,
    pub fallback_attempts: u32,
    pub active: bool,
}

impl Session {
    pub fn new(id: u64, role: SessionRole, target: &str, now: Instant) -> Self {
        let mut entered = HashMap::new();
        entered.insert(NegotiationState::Idle, now);
        Self {
            id,
            role,
            target: target.to_string(),
            state: NegotiationState::Idle,
            created_at: now,
            state_entered_at: now,
            entered,
            retry_count: 0,
            initial_proposal: None,
            last_counter: None,
            agreed: None,
            remote_caps: None,
            tried: HashSet::new(),
            fallback_attempts: 0,
            active: true,
        }
    }

    /// Validated transition. A disallowed pair forces `Failed` and
    /// reports the violation.
    pub fn transition(
        &mut self,
        to: NegotiationState,
        now: Instant,
    ) -> Result<(), NegotiateError> {
        let from = self.state;
        if !transition_allowed(from, to) {
            tracing::warn!("session {}: illegal transition {from:?} -> {to:?}", self.id);
            self.force_state(NegotiationState::Failed, now);
            return Err(NegotiateError::InvalidTransition {
                session: self.id,
                from,
                to,
            });
        }
        tracing::debug!("session {}: {from:?} -> {to:?}", self.id);
        self.force_state(to, now);
        Ok(())
    }

    fn force_state(&mut self, to: NegotiationState, now: Instant) {
        self.state = to;
        self.state_entered_at = now;
        self.entered.entry(to).or_insert(now);
    }

    /// Marks the session failed from whatever state it is in.
    pub fn fail(&mut self, now: Instant, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!("session {} failed: {reason}", self.id);
        self.force_state(NegotiationState::Failed, now);
    }

    pub fn expect_state(&self, expected: NegotiationState) -> Result<(), NegotiateError> {
        if self.state != expected {
            return Err(NegotiateError::WrongState {
                session: self.id,
                state: self.state,
                expected,
            });
        }
        Ok(())
    }
}
