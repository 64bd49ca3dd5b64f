use crate::error::NegotiateError;
use crate::preference::ParameterPreference;
use crate::session::{NegotiationState, Session, SessionRole};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use xeno_wire::{
    LinkError, NegotiableParams, NegotiationFrame, NegotiationPayload, SystemTimeProvider,
    TimeProvider, Transport,
};

/// Timeout and retry policy wrapped around the negotiation state machine.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Bound on a whole session, from creation to a terminal state.
    pub negotiation_timeout: Duration,
    /// Bound on inactivity within a single state.
    pub response_timeout: Duration,
    pub max_retries: u32,
    /// Base delay for send retries (`base · 2^attempt + jitter`).
    pub retry_base: Duration,
    pub max_fallback_attempts: u32,
    pub cleanup_interval: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            max_fallback_attempts: 3,
            cleanup_interval: Duration::from_millis(500),
        }
    }
}

/// How to answer an incoming proposal.
#[derive(Debug, Clone)]
pub enum NegotiationResponse {
    Accept,
    Counter(NegotiableParams),
    Reject(String),
}

struct EngineInner {
    sessions: Mutex<HashMap<u64, Session>>,
    next_session_id: AtomicU64,
    sequence: AtomicU32,
    prefs: ParameterPreference,
    link: Arc<dyn Transport>,
    config: NegotiationConfig,
    time: Arc<dyn TimeProvider>,
    rng: Mutex<StdRng>,
}

/// Two-role negotiation engine: a session table, a framed message link,
/// retry-wrapped sends, and a background cleanup sweep.
pub struct NegotiationEngine {
    inner: Arc<EngineInner>,
    stop: Arc<AtomicBool>,
    sweeper: Option<JoinHandle<()>>,
}

impl NegotiationEngine {
    pub fn new(
        link: Arc<dyn Transport>,
        prefs: ParameterPreference,
        config: NegotiationConfig,
    ) -> Self {
        Self::with_time(link, prefs, config, Arc::new(SystemTimeProvider))
    }

    pub fn with_time(
        link: Arc<dyn Transport>,
        prefs: ParameterPreference,
        config: NegotiationConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            sequence: AtomicU32::new(0),
            prefs,
            link,
            config,
            time,
            rng: Mutex::new(StdRng::from_entropy()),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let sweep_inner = Arc::clone(&inner);
        let sweep_stop = Arc::clone(&stop);
        let sweeper = std::thread::Builder::new()
            .name("xeno-negotiation-sweep".to_string())
            .spawn(move || {
                let slice = Duration::from_millis(50);
                while !sweep_stop.load(Ordering::SeqCst) {
                    let mut waited = Duration::ZERO;
                    while waited < sweep_inner.config.cleanup_interval {
                        if sweep_stop.load(Ordering::SeqCst) {
                            return;
                        }
                        let step = slice.min(sweep_inner.config.cleanup_interval - waited);
                        std::thread::sleep(step);
                        waited += step;
                    }
                    sweep_inner.sweep();
                }
            })
            .expect("spawn negotiation sweeper");

        Self {
            inner,
            stop,
            sweeper: Some(sweeper),
        }
    }

    pub fn preferences(&self) -> &ParameterPreference {
        &self.inner.prefs
    }

    /// Starts a session towards `target` with an initial proposal.
    pub fn initiate(
        &self,
        target: &str,
        proposed: NegotiableParams,
    ) -> Result<u64, NegotiateError> {
        proposed
            .validate()
            .map_err(|e| NegotiateError::Validation(e.to_string()))?;

        let now = self.inner.time.now_instant();
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let mut session = Session::new(id, SessionRole::Initiator, target, now);
        session.transition(NegotiationState::Initiating, now)?;
        session.initial_proposal = Some(proposed.clone());
        session.tried.insert(proposed.clone());
        self.inner.sessions.lock().unwrap().insert(id, session);

        let frame = NegotiationFrame {
            session_id: id,
            sequence: self.inner.next_sequence(),
            payload: NegotiationPayload::Propose {
                params: proposed,
                capabilities: self.inner.prefs.capability_set(),
            },
        };
        match self.inner.send_with_retry(&frame) {
            Ok(retries) => {
                let mut sessions = self.inner.sessions.lock().unwrap();
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.retry_count += retries;
                session.transition(NegotiationState::AwaitingResponse, now)?;
                tracing::info!("session {id}: proposed to {target}");
                Ok(id)
            }
            Err(e) => {
                let mut sessions = self.inner.sessions.lock().unwrap();
                if let Some(session) = sessions.get_mut(&id) {
                    session.fail(now, "initial proposal could not be sent");
                }
                Err(e)
            }
        }
    }

    /// Receives and processes one inbound frame. Returns the session id
    /// the frame applied to.
    pub fn poll(&self, timeout: Duration) -> Result<u64, NegotiateError> {
        let raw = self.inner.link.recv_frame(timeout)?;
        let frame = NegotiationFrame::decode(&raw)?;
        self.handle_frame(frame)
    }

    fn handle_frame(&self, frame: NegotiationFrame) -> Result<u64, NegotiateError> {
        let now = self.inner.time.now_instant();
        let id = frame.session_id;
        let mut sessions = self.inner.sessions.lock().unwrap();

        match frame.payload {
            NegotiationPayload::Propose {
                params,
                capabilities,
            } => {
                if sessions.contains_key(&id) {
                    return Err(NegotiateError::DuplicateSession(id));
                }
                let mut session = Session::new(id, SessionRole::Responder, "remote", now);
                session.transition(NegotiationState::ProposalReceived, now)?;
                session.initial_proposal = Some(params);
                session.remote_caps = Some(capabilities);
                sessions.insert(id, session);
                tracing::info!("session {id}: proposal received");
                Ok(id)
            }
            NegotiationPayload::Accept { params } => {
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.expect_state(NegotiationState::AwaitingResponse)?;
                let agreed = params.or_else(|| session.initial_proposal.clone());
                session.agreed = agreed;
                session.transition(NegotiationState::Finalizing, now)?;
                Ok(id)
            }
            NegotiationPayload::Counter {
                params,
                capabilities,
            } => {
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.expect_state(NegotiationState::AwaitingResponse)?;
                session.last_counter = Some(params);
                session.remote_caps = Some(capabilities);
                session.transition(NegotiationState::CounterReceived, now)?;
                Ok(id)
            }
            NegotiationPayload::Reject { reason } => {
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.fail(now, &format!("rejected by peer: {reason}"));
                Ok(id)
            }
            NegotiationPayload::Finalize { params } => {
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.expect_state(NegotiationState::AwaitingFinalization)?;
                params
                    .validate()
                    .map_err(|e| NegotiateError::Validation(e.to_string()))?;
                session.agreed = Some(params);
                session.transition(NegotiationState::Finalized, now)?;
                tracing::info!("session {id}: finalized by peer");
                Ok(id)
            }
            NegotiationPayload::Close => {
                let session = sessions.get_mut(&id).ok_or(NegotiateError::UnknownSession(id))?;
                session.active = false;
                if !matches!(session.state, NegotiationState::Closed) {
                    let _ = session.transition(NegotiationState::Closed, now);
                }
                Ok(id)
            }
        }
    }

    /// Responds to a received proposal: accept it, counter it, or reject.
    pub fn respond(
        &self,
        session_id: u64,
        response: NegotiationResponse,
    ) -> Result<(), NegotiateError> {
        let now = self.inner.time.now_instant();
        let payload = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(NegotiateError::UnknownSession(session_id))?;
            session.expect_state(NegotiationState::ProposalReceived)?;

            match &response {
                NegotiationResponse::Accept => {
                    session.agreed = session.initial_proposal.clone();
                }
                NegotiationResponse::Counter(params) => {
                    params
                        .validate()
                        .map_err(|e| NegotiateError::Validation(e.to_string()))?;
                    session.tried.insert(params.clone());
                    session.last_counter = Some(params.clone());
                    session.fallback_attempts += 1;
                }
                NegotiationResponse::Reject(_) => {}
            }
            session.transition(NegotiationState::Responding, now)?;

            match response {
                NegotiationResponse::Accept => NegotiationPayload::Accept {
                    params: session.agreed.clone(),
                },
                NegotiationResponse::Counter(params) => NegotiationPayload::Counter {
                    params,
                    capabilities: self.inner.prefs.capability_set(),
                },
                NegotiationResponse::Reject(reason) => NegotiationPayload::Reject { reason },
            }
        };

        let rejecting = matches!(payload, NegotiationPayload::Reject { .. });
        let frame = NegotiationFrame {
            session_id,
            sequence: self.inner.next_sequence(),
            payload,
        };
        let sent = self.inner.send_with_retry(&frame);

        let mut sessions = self.inner.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(NegotiateError::UnknownSession(session_id))?;
        match sent {
            Ok(retries) => {
                session.retry_count += retries;
                if rejecting {
                    session.fail(now, "proposal rejected locally");
                } else {
                    session.transition(NegotiationState::AwaitingFinalization, now)?;
                }
                Ok(())
            }
            Err(e) => {
                session.fail(now, "response could not be sent");
                Err(e)
            }
        }
    }

    /// Computes a counter-proposal for an incompatible incoming proposal:
    /// the best intersection of local preferences and the remote
    /// capability bag that has not been tried yet.
    pub fn propose_counter(&self, session_id: u64) -> Result<NegotiableParams, NegotiateError> {
        let mut sessions = self.inner.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(NegotiateError::UnknownSession(session_id))?;
        if session.fallback_attempts >= self.inner.config.max_fallback_attempts {
            return Err(NegotiateError::FallbackExhausted(session.fallback_attempts));
        }
        let caps = session
            .remote_caps
            .as_ref()
            .ok_or_else(|| NegotiateError::Protocol("no remote capabilities cached".to_string()))?;

        let direct = self.inner.prefs.build_compatible(caps)?;
        if !session.tried.contains(&direct) {
            return Ok(direct);
        }
        let alternatives = self.inner.prefs.generate_alternatives(&direct, caps, 8);
        alternatives
            .into_iter()
            .find(|candidate| !session.tried.contains(candidate))
            .ok_or_else(|| {
                NegotiateError::NoCompatibleParams(
                    "every compatible parameter set already tried".to_string(),
                )
            })
    }

    /// (Initiator) Accepts a received counter-proposal and moves to
    /// finalization.
    pub fn accept_counter(&self, session_id: u64) -> Result<(), NegotiateError> {
        let now = self.inner.time.now_instant();
        let mut sessions = self.inner.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(NegotiateError::UnknownSession(session_id))?;
        session.expect_state(NegotiationState::CounterReceived)?;
        let counter = session
            .last_counter
            .clone()
            .ok_or_else(|| NegotiateError::Protocol("no counter-proposal cached".to_string()))?;
        session.agreed = Some(counter);
        session.transition(NegotiationState::Finalizing, now)
    }

    /// (Initiator) Rejects a received counter-proposal, failing the
    /// session.
    pub fn reject_counter(
        &self,
        session_id: u64,
        reason: Option<String>,
    ) -> Result<(), NegotiateError> {
        let now = self.inner.time.now_instant();
        {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(NegotiateError::UnknownSession(session_id))?;
            session.expect_state(NegotiationState::CounterReceived)?;
        }
        let frame = NegotiationFrame {
            session_id,
            sequence: self.inner.next_sequence(),
            payload: NegotiationPayload::Reject {
                reason: reason.unwrap_or_else(|| "counter-proposal rejected".to_string()),
            },
        };
        let sent = self.inner.send_with_retry(&frame).map(|_| ());

        let mut sessions = self.inner.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.fail(now, "counter-proposal rejected locally");
        }
        sent
    }

    /// Confirms the agreed parameters with the peer and finalizes.
    pub fn finalize(&self, session_id: u64) -> Result<NegotiableParams, NegotiateError> {
        let now = self.inner.time.now_instant();
        let agreed = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(NegotiateError::UnknownSession(session_id))?;
            session.expect_state(NegotiationState::Finalizing)?;
            let agreed = session
                .agreed
                .clone()
                .ok_or_else(|| NegotiateError::Protocol("no agreed parameters".to_string()))?;
            agreed
                .validate()
                .map_err(|e| NegotiateError::Validation(e.to_string()))?;
            agreed
        };

        let frame = NegotiationFrame {
            session_id,
            sequence: self.inner.next_sequence(),
            payload: NegotiationPayload::Finalize {
                params: agreed.clone(),
            },
        };
        let sent = self.inner.send_with_retry(&frame);

        let mut sessions = self.inner.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&session_id)
            .ok_or(NegotiateError::UnknownSession(session_id))?;
        match sent {
            Ok(retries) => {
                session.retry_count += retries;
                session.transition(NegotiationState::Finalized, now)?;
                tracing::info!("session {session_id}: finalized");
                Ok(agreed)
            }
            Err(e) => {
                session.fail(now, "finalize could not be sent");
                Err(e)
            }
        }
    }

    /// Closes a session. Idempotent; sends a best-effort CLOSE to the
    /// peer when the session is not already terminal.
    pub fn close(&self, session_id: u64) -> Result<(), NegotiateError> {
        let now = self.inner.time.now_instant();
        let was_terminal = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(NegotiateError::UnknownSession(session_id))?;
            if session.state == NegotiationState::Closed {
                return Ok(());
            }
            let was_terminal = session.state.is_terminal();
            let _ = session.transition(NegotiationState::Closed, now);
            session.active = false;
            was_terminal
        };

        if !was_terminal {
            let frame = NegotiationFrame {
                session_id,
                sequence: self.inner.next_sequence(),
                payload: NegotiationPayload::Close,
            };
            if let Err(e) = self.inner.link.send_frame(&frame.encode()) {
                tracing::debug!("close notification for session {session_id} not sent: {e}");
            }
        }
        Ok(())
    }

    pub fn session_state(&self, session_id: u64) -> Result<NegotiationState, NegotiateError> {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|session| session.state)
            .ok_or(NegotiateError::UnknownSession(session_id))
    }

    /// Agreed parameters of a finalized session, retrievable until the
    /// session is reaped.
    pub fn negotiated_params(
        &self,
        session_id: u64,
    ) -> Result<Option<NegotiableParams>, NegotiateError> {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|session| session.agreed.clone())
            .ok_or(NegotiateError::UnknownSession(session_id))
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    /// One manual sweep pass, also run periodically by the background
    /// worker.
    pub fn sweep_now(&self) {
        self.inner.sweep();
    }
}

impl Drop for NegotiationEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.join();
        }
    }
}

impl EngineInner {
    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a frame with exponential backoff and jitter.
    /// Returns how many retries were needed.
    fn send_with_retry(&self, frame: &NegotiationFrame) -> Result<u32, NegotiateError> {
        let bytes = frame.encode();
        let mut attempt = 0u32;
        loop {
            match self.link.send_frame(&bytes) {
                Ok(()) => return Ok(attempt),
                Err(e) if attempt >= self.config.max_retries => {
                    return Err(NegotiateError::Link(e));
                }
                Err(LinkError::Closed) => return Err(NegotiateError::Link(LinkError::Closed)),
                Err(e) => {
                    let base_ms = self.config.retry_base.as_millis().max(1) as u64;
                    let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
                    let jitter = self.rng.lock().unwrap().gen_range(0..=base_ms / 2);
                    let delay = Duration::from_millis(base_ms.saturating_mul(factor) + jitter);
                    tracing::debug!(
                        "send attempt {attempt} for session {} failed ({e}); retrying in {delay:?}",
                        frame.session_id
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Fails timed-out sessions and reaps closed ones.
    fn sweep(&self) {
        let now = self.time.now_instant();
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.values_mut() {
            if session.state.is_terminal() {
                continue;
            }
            if now.duration_since(session.created_at) >= self.config.negotiation_timeout {
                session.fail(now, "negotiation timeout exceeded");
            } else if now.duration_since(session.state_entered_at) >= self.config.response_timeout {
                session.fail(now, "response timeout exceeded");
            }
        }
        let before = sessions.len();
        sessions.retain(|_, session| {
            !(session.state == NegotiationState::Closed && !session.active)
        });
        let reaped = before - sessions.len();
        if reaped > 0 {
            tracing::debug!("reaped {reaped} closed negotiation sessions");
        }
    }
}
