use crate::config::TransmissionConfig;
use crate::correction::{build_coder, crc32, ErrorCoder};
use crate::error::TransmitError;
use crate::flow::FlowController;
use crate::fragment::{Fragmenter, InsertOutcome};
use crate::outcome::{CommunicationOutcome, ConfigSink, OutcomeSink};
use crate::retry::{RetryCallback, RetryEvent, RetryEventKind, RetryPolicy, RetryStats, RetryTracker};
use crate::stats::{Counters, TransmissionStats};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use xeno_secure::SecureChannel;
use xeno_wire::fragment::ack_code;
use xeno_wire::{
    FragmentAck, FragmentHeader, LinkError, SystemTimeProvider, TimeProvider, Transport,
    FRAGMENT_ACK_SIZE, FRAGMENT_HEADER_SIZE,
};

/// Upper bound on one blocking link read while waiting on a condition,
/// so concurrent waiters can re-check shared queues.
const PUMP_SLICE: Duration = Duration::from_millis(20);

/// Orchestrates error coding, fragmentation, flow control, retries, and
/// the secure channel into reliable `send`/`receive` operations.
pub struct TransmissionManager {
    link: Arc<dyn Transport>,
    time: Arc<dyn TimeProvider>,
    config: Mutex<TransmissionConfig>,
    coder: Mutex<Box<dyn ErrorCoder>>,
    flow: FlowController,
    fragmenter: Fragmenter,
    secure: Mutex<Option<Arc<SecureChannel>>>,
    inbound_fragments: Mutex<VecDeque<Vec<u8>>>,
    pending_acks: Mutex<HashMap<(u32, u16), FragmentAck>>,
    retry: RetryTracker,
    counters: Mutex<Counters>,
    outcome_sink: Mutex<Option<Arc<dyn OutcomeSink>>>,
    rng: Mutex<StdRng>,
}

impl TransmissionManager {
    pub fn new(
        link: Arc<dyn Transport>,
        config: TransmissionConfig,
    ) -> Result<Self, TransmitError> {
        Self::with_time(link, config, Arc::new(SystemTimeProvider))
    }

    pub fn with_time(
        link: Arc<dyn Transport>,
        config: TransmissionConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self, TransmitError> {
        config.validate()?;
        let coder = build_coder(config.error_correction, &config.reed_solomon)?;
        let flow = FlowController::new(config.flow.clone(), config.fragment.max_fragment_size);
        Ok(Self {
            link,
            time,
            coder: Mutex::new(coder),
            flow,
            fragmenter: Fragmenter::new(),
            secure: Mutex::new(None),
            inbound_fragments: Mutex::new(VecDeque::new()),
            pending_acks: Mutex::new(HashMap::new()),
            retry: RetryTracker::new(),
            counters: Mutex::new(Counters::default()),
            outcome_sink: Mutex::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
            config: Mutex::new(config),
        })
    }

    /// Attaches a secure channel used to protect fragment payloads. The
    /// channel handshakes over its own link.
    pub fn attach_secure_channel(&self, channel: Arc<SecureChannel>) {
        *self.secure.lock().unwrap() = Some(channel);
    }

    pub fn set_outcome_sink(&self, sink: Arc<dyn OutcomeSink>) {
        *self.outcome_sink.lock().unwrap() = Some(sink);
    }

    pub fn set_retry_callback(&self, callback: Option<RetryCallback>) {
        self.retry.set_callback(callback);
    }

    pub fn config(&self) -> TransmissionConfig {
        self.config.lock().unwrap().clone()
    }

    /// Applies a new configuration, rebuilding the error coder and
    /// re-bounding the flow window.
    pub fn set_config(&self, config: TransmissionConfig) -> Result<(), TransmitError> {
        config.validate()?;
        let coder = build_coder(config.error_correction, &config.reed_solomon)?;
        self.flow
            .reconfigure(config.flow.clone(), config.fragment.max_fragment_size);
        *self.coder.lock().unwrap() = coder;
        *self.config.lock().unwrap() = config;
        tracing::info!("transmission configuration updated");
        Ok(())
    }

    /// Establishes the attached secure channel.
    pub fn setup_secure_channel(&self) -> Result<(), TransmitError> {
        let channel = self.secure.lock().unwrap().clone();
        match channel {
            Some(channel) => {
                channel.establish()?;
                Ok(())
            }
            None => Err(TransmitError::EncryptionRequired),
        }
    }

    /// Re-runs the secure handshake on the attached channel.
    pub fn renegotiate_security(&self) -> Result<(), TransmitError> {
        let channel = self.secure.lock().unwrap().clone();
        match channel {
            Some(channel) => {
                channel.renegotiate()?;
                Ok(())
            }
            None => Err(TransmitError::EncryptionRequired),
        }
    }

    /// Human-readable security posture.
    pub fn security_status(&self) -> String {
        let channel = self.secure.lock().unwrap().clone();
        match channel {
            Some(channel) if channel.is_established() => {
                let meta = channel.metadata();
                format!(
                    "encrypted ({}, {}, peer {})",
                    meta.cipher_suite,
                    meta.protocol_version,
                    meta.peer_identity.unwrap_or_else(|| "unknown".to_string())
                )
            }
            Some(_) => "secure channel attached, not established".to_string(),
            None => "plaintext".to_string(),
        }
    }

    /// Sends a payload reliably: fragment, protect, admit, transmit,
    /// await per-fragment acknowledgment with retry.
    pub fn send(&self, data: &[u8]) -> Result<(), TransmitError> {
        let started = Instant::now();
        let result = self.send_inner(data);
        let latency = started.elapsed();
        match &result {
            Ok(summary) => self.publish_outcome(true, latency, data.len(), summary.retries, 0, None),
            Err(e) => {
                self.publish_outcome(false, latency, data.len(), 0, 1, Some(e.tag()));
            }
        }
        result.map(|_| ())
    }

    fn send_inner(&self, data: &[u8]) -> Result<SendSummary, TransmitError> {
        if data.is_empty() {
            return Ok(SendSummary { retries: 0 });
        }
        let config = self.config();

        let channel = self.secure.lock().unwrap().clone();
        let mut encrypt = config.security.enable_encryption
            && channel.as_ref().is_some_and(|c| c.is_established());
        if config.security.require_encryption && !encrypt {
            match &channel {
                Some(c) => {
                    c.establish()?;
                    encrypt = true;
                }
                None => return Err(TransmitError::EncryptionRequired),
            }
        }

        let max_fragment = config.fragment.max_fragment_size as usize;
        let needed = Fragmenter::fragment_count(data.len(), max_fragment);
        if needed > config.fragment.max_fragments as usize || needed > u16::MAX as usize {
            return Err(TransmitError::TooManyFragments {
                size: data.len(),
                needed,
                max: config.fragment.max_fragments.min(u16::MAX as u32),
            });
        }

        let transmission_id = self.fragmenter.next_transmission_id();
        let total_fragments = needed as u16;
        let mut summary = SendSummary { retries: 0 };

        for (index, chunk) in data.chunks(max_fragment).enumerate() {
            let mut payload = chunk.to_vec();
            if encrypt {
                let c = channel.as_ref().ok_or(TransmitError::EncryptionRequired)?;
                payload = c.encrypt_record(&payload)?;
            }
            let wire_payload = self.coder.lock().unwrap().encode(&payload);
            let header = FragmentHeader {
                transmission_id,
                fragment_index: index as u16,
                total_fragments,
                fragment_size: wire_payload.len() as u32,
                original_size: data.len() as u32,
                error_check: crc32::checksum(&wire_payload),
                is_encrypted: encrypt,
                security_flags: 0,
            };
            let frame = header.frame(&wire_payload);
            self.send_fragment(&frame, &header, &config, channel.as_deref(), &mut summary)?;
        }
        Ok(summary)
    }

    fn send_fragment(
        &self,
        frame: &[u8],
        header: &FragmentHeader,
        config: &TransmissionConfig,
        channel: Option<&SecureChannel>,
        summary: &mut SendSummary,
    ) -> Result<(), TransmitError> {
        let budget = frame.len() as u32;
        self.flow
            .acquire(budget, config.flow.window_wait_timeout)
            .map_err(|e| {
                tracing::warn!(
                    "transmission {} fragment {}: {e}",
                    header.transmission_id,
                    header.fragment_index
                );
                e
            })?;

        let policy = RetryPolicy::new(
            config.retransmission.retry_timeout,
            config.retransmission.max_retries,
        );
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                self.with_counters(|c| c.retransmissions += 1);
                self.emit_retry(RetryEventKind::Attempt, header, attempt, None, None);
            }
            let sent_at = Instant::now();
            if let Err(e) = self.link.send_frame(frame) {
                self.flow.release(budget);
                if !self.link.check_health() {
                    tracing::warn!("link reported unhealthy while sending: {e}");
                }
                return Err(TransmitError::Link(e));
            }
            self.with_counters(|c| {
                c.packets_sent += 1;
                c.bytes_sent += frame.len() as u64;
            });

            let wait = self.wait_for_ack(
                header.transmission_id,
                header.fragment_index,
                config.retransmission.ack_timeout,
            );
            match wait {
                Ok(ack) if ack.success => {
                    let rtt = sent_at.elapsed();
                    self.flow.on_ack(rtt);
                    self.flow.release(budget);
                    if let Some(c) = channel {
                        c.record_rtt_sample(rtt);
                    }
                    if attempt > 0 {
                        self.emit_retry(
                            RetryEventKind::Success,
                            header,
                            attempt,
                            None,
                            Some(rtt),
                        );
                    }
                    return Ok(());
                }
                Ok(nack) => {
                    tracing::debug!(
                        "transmission {} fragment {} rejected by peer (code {})",
                        header.transmission_id,
                        header.fragment_index,
                        nack.error_code
                    );
                    self.with_counters(|c| c.packet_loss_count += 1);
                    self.flow.on_loss();
                }
                Err(TransmitError::AckTimeout { .. }) => {
                    self.with_counters(|c| c.packet_loss_count += 1);
                    self.flow.on_loss();
                }
                Err(e) => {
                    self.flow.release(budget);
                    return Err(e);
                }
            }

            if attempt >= config.retransmission.max_retries {
                self.emit_retry(
                    RetryEventKind::MaxRetriesReached,
                    header,
                    attempt,
                    Some("retry budget exhausted".to_string()),
                    None,
                );
                self.flow.release(budget);
                return Err(TransmitError::MaxRetriesReached {
                    transmission_id: header.transmission_id,
                    fragment_index: header.fragment_index,
                    attempts: attempt + 1,
                });
            }
            self.emit_retry(
                RetryEventKind::Failure,
                header,
                attempt,
                Some("no positive acknowledgment".to_string()),
                None,
            );
            let delay = policy.delay(attempt, &mut *self.rng.lock().unwrap());
            std::thread::sleep(delay);
            attempt += 1;
            summary.retries += 1;
        }
    }

    /// Receives the next complete payload, feeding fragments through
    /// verification, decoding, decryption, acknowledgment, and reassembly.
    pub fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransmitError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let config = self.config();

        loop {
            let expired = self
                .fragmenter
                .expire_stale(Instant::now(), &config.fragment);
            if expired > 0 {
                tracing::debug!("expired {expired} stale reassembly contexts");
            }

            let frame = self.inbound_fragments.lock().unwrap().pop_front();
            if let Some(frame) = frame {
                if let Some(payload) = self.process_fragment(frame, &config)? {
                    let latency = started.elapsed();
                    self.publish_outcome(true, latency, payload.len(), 0, 0, None);
                    return Ok(payload);
                }
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransmitError::ReceiveTimeout(timeout));
            }
            self.pump(remaining.min(PUMP_SLICE))?;
        }
    }

    /// Reads one frame from the link (if any) and routes it to the ACK
    /// map or the inbound fragment queue.
    fn pump(&self, slice: Duration) -> Result<(), TransmitError> {
        match self.link.recv_frame(slice) {
            Ok(frame) => {
                self.route_frame(frame);
                Ok(())
            }
            Err(LinkError::Timeout(_)) => Ok(()),
            Err(e) => Err(TransmitError::Link(e)),
        }
    }

    fn route_frame(&self, frame: Vec<u8>) {
        if frame.len() == FRAGMENT_ACK_SIZE {
            match FragmentAck::decode(&frame) {
                Ok(ack) => {
                    self.pending_acks
                        .lock()
                        .unwrap()
                        .insert((ack.transmission_id, ack.fragment_index), ack);
                }
                Err(e) => tracing::warn!("undecodable acknowledgment frame: {e}"),
            }
        } else if frame.len() >= FRAGMENT_HEADER_SIZE {
            self.inbound_fragments.lock().unwrap().push_back(frame);
        } else {
            tracing::warn!("dropping runt frame of {} bytes", frame.len());
        }
    }

    fn wait_for_ack(
        &self,
        transmission_id: u32,
        fragment_index: u16,
        timeout: Duration,
    ) -> Result<FragmentAck, TransmitError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(ack) = self
                .pending_acks
                .lock()
                .unwrap()
                .remove(&(transmission_id, fragment_index))
            {
                return Ok(ack);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransmitError::AckTimeout {
                    transmission_id,
                    fragment_index,
                    timeout,
                });
            }
            self.pump(remaining.min(PUMP_SLICE))?;
        }
    }

    /// Handles one fragment frame. Returns a payload when its
    /// transmission completes.
    fn process_fragment(
        &self,
        frame: Vec<u8>,
        config: &TransmissionConfig,
    ) -> Result<Option<Vec<u8>>, TransmitError> {
        let (header, wire_payload) = match FragmentHeader::split_frame(&frame) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!("dropping malformed fragment frame: {e}");
                return Ok(None);
            }
        };
        self.with_counters(|c| {
            c.packets_received += 1;
            c.bytes_received += frame.len() as u64;
        });

        // A digest mismatch is final only for detection-style coders; a
        // correcting coder still gets to attempt a repair.
        if crc32::checksum(wire_payload) != header.error_check
            && !self.coder.lock().unwrap().can_correct()
        {
            tracing::debug!(
                "transmission {} fragment {}: header checksum mismatch",
                header.transmission_id,
                header.fragment_index
            );
            self.send_ack(FragmentAck::failed(
                header.transmission_id,
                header.fragment_index,
                ack_code::CHECKSUM_MISMATCH,
            ))?;
            return Ok(None);
        }

        let decoded = match self.coder.lock().unwrap().decode(wire_payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    "transmission {} fragment {}: {e}; requesting retransmission",
                    header.transmission_id,
                    header.fragment_index
                );
                self.send_ack(FragmentAck::failed(
                    header.transmission_id,
                    header.fragment_index,
                    ack_code::UNCORRECTABLE,
                ))?;
                return Ok(None);
            }
        };

        // Duplicates are acknowledged and discarded before decryption so a
        // replayed record never reaches the channel twice.
        if self
            .fragmenter
            .is_duplicate(header.transmission_id, header.fragment_index)
        {
            self.send_ack(FragmentAck::ok(
                header.transmission_id,
                header.fragment_index,
            ))?;
            return Ok(None);
        }

        let plain = if header.is_encrypted {
            let channel = self.secure.lock().unwrap().clone();
            match channel {
                Some(channel) => match channel.decrypt_record(&decoded) {
                    Ok(plain) => plain,
                    Err(e) => {
                        self.send_ack(FragmentAck::failed(
                            header.transmission_id,
                            header.fragment_index,
                            ack_code::DECRYPT_FAILED,
                        ))?;
                        return Err(TransmitError::Security(e));
                    }
                },
                None => {
                    self.send_ack(FragmentAck::failed(
                        header.transmission_id,
                        header.fragment_index,
                        ack_code::DECRYPT_FAILED,
                    ))?;
                    return Err(TransmitError::Protocol(format!(
                        "transmission {} is encrypted but no secure channel is attached",
                        header.transmission_id
                    )));
                }
            }
        } else {
            decoded
        };

        self.send_ack(FragmentAck::ok(
            header.transmission_id,
            header.fragment_index,
        ))?;

        match self
            .fragmenter
            .insert_fragment(&header, plain, Instant::now(), &config.fragment)
        {
            Ok(InsertOutcome::Complete(payload)) => Ok(Some(payload)),
            Ok(InsertOutcome::Stored) | Ok(InsertOutcome::Duplicate) => Ok(None),
            Err(TransmitError::BufferExhausted) => {
                tracing::warn!(
                    "transmission {}: reassembly budget exhausted, fragment dropped",
                    header.transmission_id
                );
                self.send_ack(FragmentAck::failed(
                    header.transmission_id,
                    header.fragment_index,
                    ack_code::REASSEMBLY_REJECTED,
                ))?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("reassembly rejected a fragment: {e}");
                Ok(None)
            }
        }
    }

    fn send_ack(&self, ack: FragmentAck) -> Result<(), TransmitError> {
        self.link.send_frame(&ack.encode())?;
        Ok(())
    }

    fn emit_retry(
        &self,
        kind: RetryEventKind,
        header: &FragmentHeader,
        attempt: u32,
        error: Option<String>,
        latency: Option<Duration>,
    ) {
        self.retry.record(RetryEvent {
            kind,
            transmission_id: header.transmission_id,
            fragment_index: header.fragment_index,
            attempt,
            error,
            latency,
            timestamp: self.time.now_system(),
        });
    }

    fn with_counters(&self, update: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.lock().unwrap();
        update(&mut counters);
        counters.last_update = Some(self.time.now_system());
    }

    fn publish_outcome(
        &self,
        success: bool,
        latency: Duration,
        bytes: usize,
        retries: u32,
        errors: u32,
        error_tag: Option<&'static str>,
    ) {
        let sink = self.outcome_sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.record_outcome(CommunicationOutcome {
                success,
                latency,
                bytes_transferred: bytes as u32,
                retry_count: retries,
                error_count: errors,
                error_type: error_tag.map(str::to_string),
                timestamp: self.time.now_system(),
            });
        }
    }

    pub fn get_stats(&self) -> TransmissionStats {
        let counters = self.counters.lock().unwrap().clone();
        let flow = self.flow.snapshot();
        let channel = self.secure.lock().unwrap().clone();
        let meta = channel.map(|c| c.metadata());

        TransmissionStats {
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            packets_sent: counters.packets_sent,
            packets_received: counters.packets_received,
            retransmissions: counters.retransmissions,
            packet_loss_count: counters.packet_loss_count,
            current_rtt: flow.last_rtt,
            avg_rtt: flow.smoothed_rtt,
            min_rtt: flow.min_rtt,
            max_rtt: flow.max_rtt,
            current_window_size: flow.current_window_size,
            in_congestion_avoidance: flow.in_congestion_avoidance,
            is_encrypted: meta.as_ref().is_some_and(|m| m.established),
            cipher_suite: meta.as_ref().map(|m| m.cipher_suite.clone()),
            protocol_version: meta.as_ref().map(|m| m.protocol_version.clone()),
            peer_identity: meta.and_then(|m| m.peer_identity),
            last_update: counters.last_update,
        }
    }

    pub fn reset_stats(&self) {
        *self.counters.lock().unwrap() = Counters::default();
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    pub fn reset_retry_stats(&self) {
        self.retry.reset();
    }

    pub fn pending_reassemblies(&self) -> usize {
        self.fragmenter.pending_contexts()
    }
}

impl ConfigSink for TransmissionManager {
    fn apply_config(&self, config: TransmissionConfig) {
        if let Err(e) = self.set_config(config) {
            tracing::warn!("rejected pushed configuration: {e}");
        }
    }
}

struct SendSummary {
    retries: u32,
}
