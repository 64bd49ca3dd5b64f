use crate::adaptive::{AdaptiveRecordConfig, AdaptiveRecordSizer};
use crate::batch::{record_frame, RecordBatchConfig, RecordBatcher};
use crate::context::{Bio, HandshakeStatus, SecureContext};
use crate::error::SecureError;
use crate::handshake::{close_notify_frame, frame_type};
use crate::keystore::KeyStore;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use xeno_wire::{LinkError, TimeProvider, Transport};

/// Vectored sends engage above this combined payload size.
const VECTORED_THRESHOLD: usize = 8 * 1024;

/// Channel configuration: the union of the security options recognized by
/// the stack (one shape, used by both the channel and the manager policy).
#[derive(Debug, Clone)]
pub struct SecureChannelConfig {
    pub handshake_timeout: Duration,
    pub verify_hostname: bool,
    pub expected_hostname: Option<String>,
    pub alpn_protocols: Vec<String>,
    pub enable_session_resumption: bool,
    pub session_cache_size: usize,
    pub batching: RecordBatchConfig,
    pub adaptive: AdaptiveRecordConfig,
    /// TTL applied to session keys handed to the key store.
    pub key_ttl: Option<Duration>,
}

impl Default for SecureChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            verify_hostname: true,
            expected_hostname: None,
            alpn_protocols: Vec::new(),
            enable_session_resumption: true,
            session_cache_size: 1000,
            batching: RecordBatchConfig::default(),
            adaptive: AdaptiveRecordConfig::default(),
            key_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

/// Snapshot of the channel's security metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub established: bool,
    /// Handshake completed through the abbreviated resumption path.
    pub resumed: bool,
    pub cipher_suite: String,
    pub protocol_version: String,
    pub peer_identity: Option<String>,
}

struct ResumptionCache {
    entries: HashMap<String, [u8; 32]>,
    order: VecDeque<String>,
    cap: usize,
}

impl ResumptionCache {
    fn new(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    fn insert(&mut self, peer: String, secret: [u8; 32]) {
        if self.entries.insert(peer.clone(), secret).is_none() {
            self.order.push_back(peer);
        }
        while self.entries.len() > self.cap {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

type ContextFactory = Box<dyn Fn() -> Box<dyn SecureContext> + Send + Sync>;

/// A secure record channel over a frame link.
///
/// One channel serves two roles: it is a transport wrapper
/// (`send`/`recv`/`sendv` move records over its own link) and a record
/// codec for the transmission manager (`encrypt_record`/`decrypt_record`
/// protect fragment payloads carried elsewhere).
pub struct SecureChannel {
    link: Arc<dyn Transport>,
    ctx: Mutex<Box<dyn SecureContext>>,
    ctx_factory: ContextFactory,
    established: AtomicBool,
    pending_plain: Mutex<VecDeque<Vec<u8>>>,
    batcher: Mutex<Option<RecordBatcher>>,
    sizer: Mutex<AdaptiveRecordSizer>,
    resumption: Mutex<ResumptionCache>,
    keystore: Mutex<Option<Arc<KeyStore>>>,
    key_id: Mutex<Option<Uuid>>,
    peer_label: String,
    config: SecureChannelConfig,
    time: Arc<dyn TimeProvider>,
}

impl SecureChannel {
    pub fn new(
        link: Arc<dyn Transport>,
        peer_label: &str,
        config: SecureChannelConfig,
        time: Arc<dyn TimeProvider>,
        ctx_factory: ContextFactory,
    ) -> Self {
        let now = time.now_instant();
        Self {
            link,
            ctx: Mutex::new(ctx_factory()),
            ctx_factory,
            established: AtomicBool::new(false),
            pending_plain: Mutex::new(VecDeque::new()),
            batcher: Mutex::new(None),
            sizer: Mutex::new(AdaptiveRecordSizer::new(config.adaptive.clone(), now)),
            resumption: Mutex::new(ResumptionCache::new(config.session_cache_size)),
            keystore: Mutex::new(None),
            key_id: Mutex::new(None),
            peer_label: peer_label.to_string(),
            config,
            time,
        }
    }

    /// Hands session keys to a store after each successful handshake.
    pub fn set_keystore(&self, keystore: Arc<KeyStore>) {
        *self.keystore.lock().unwrap() = Some(keystore);
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }

    pub fn peer_label(&self) -> &str {
        &self.peer_label
    }

    pub fn key_id(&self) -> Option<Uuid> {
        *self.key_id.lock().unwrap()
    }

    pub fn metadata(&self) -> ChannelMetadata {
        let ctx = self.ctx.lock().unwrap();
        ChannelMetadata {
            established: self.is_established(),
            resumed: ctx.was_resumed(),
            cipher_suite: ctx.cipher_suite().to_string(),
            protocol_version: ctx.protocol_version().to_string(),
            peer_identity: ctx.peer_identity(),
        }
    }

    /// Drives the handshake to completion, pumping frames between the
    /// context's BIO and the link. Batching stays off until `Done`.
    pub fn establish(&self) -> Result<(), SecureError> {
        let deadline = self.time.now_instant() + self.config.handshake_timeout;
        let mut ctx = self.ctx.lock().unwrap();
        if ctx.is_established() {
            return Ok(());
        }
        if self.config.enable_session_resumption {
            let cached = self
                .resumption
                .lock()
                .unwrap()
                .entries
                .get(&self.peer_label)
                .copied();
            if let Some(secret) = cached {
                if ctx.offer_resumption(secret) {
                    tracing::debug!(
                        "offering cached session to {} for an abbreviated handshake",
                        self.peer_label
                    );
                }
            }
        }
        let mut bio = Bio::new();

        loop {
            match ctx.do_handshake_step(&mut bio) {
                HandshakeStatus::Done => {
                    while let Some(frame) = bio.outgoing.pop_front() {
                        self.link.send_frame(&frame)?;
                    }
                    break;
                }
                HandshakeStatus::WantWrite => {
                    while let Some(frame) = bio.outgoing.pop_front() {
                        self.link.send_frame(&frame)?;
                    }
                }
                HandshakeStatus::WantRead => {
                    let remaining = deadline.saturating_duration_since(self.time.now_instant());
                    if remaining.is_zero() {
                        return Err(SecureError::HandshakeTimeout(self.config.handshake_timeout));
                    }
                    match self.link.recv_frame(remaining) {
                        Ok(frame) => bio.incoming.push_back(frame),
                        Err(LinkError::Timeout(_)) => {
                            return Err(SecureError::HandshakeTimeout(
                                self.config.handshake_timeout,
                            ));
                        }
                        Err(e) => return Err(SecureError::Link(e)),
                    }
                }
                HandshakeStatus::Failed(reason) => {
                    return Err(SecureError::Handshake(reason));
                }
            }
        }

        if self.config.verify_hostname {
            if let Some(expected) = &self.config.expected_hostname {
                if expected != &self.peer_label {
                    ctx.shutdown();
                    return Err(SecureError::Handshake(format!(
                        "hostname mismatch: expected {expected}, connected to {}",
                        self.peer_label
                    )));
                }
            }
        }

        if let Some(store) = self.keystore.lock().unwrap().as_ref() {
            if let Some(secret) = ctx.session_secret() {
                *self.key_id.lock().unwrap() = Some(store.insert(secret, self.config.key_ttl));
            }
        }
        let resumed = ctx.was_resumed();
        drop(ctx);

        self.established.store(true, Ordering::SeqCst);
        if self.config.batching.enabled {
            let mut batcher = self.batcher.lock().unwrap();
            if batcher.is_none() {
                *batcher = Some(RecordBatcher::start(
                    self.config.batching.clone(),
                    Arc::clone(&self.link),
                ));
            }
        }
        if resumed {
            tracing::info!("secure channel with {} resumed", self.peer_label);
        } else {
            tracing::info!("secure channel with {} established", self.peer_label);
        }
        Ok(())
    }

    fn fatal(&self, err: SecureError) -> SecureError {
        if matches!(
            err,
            SecureError::BadRecordMac | SecureError::Replay(_) | SecureError::MalformedRecord(_)
        ) {
            tracing::warn!(
                "fatal record error on channel with {}: {err}",
                self.peer_label
            );
            self.established.store(false, Ordering::SeqCst);
            self.ctx.lock().unwrap().shutdown();
        }
        err
    }

    /// Encrypts one plaintext into a raw record for external carriage.
    pub fn encrypt_record(&self, plain: &[u8]) -> Result<Vec<u8>, SecureError> {
        if !self.is_established() {
            return Err(SecureError::NotEstablished);
        }
        self.ctx.lock().unwrap().encrypt(plain)
    }

    /// Decrypts a raw record produced by the peer. Errors close the channel.
    pub fn decrypt_record(&self, record: &[u8]) -> Result<Vec<u8>, SecureError> {
        if !self.is_established() {
            return Err(SecureError::NotEstablished);
        }
        let result = self.ctx.lock().unwrap().decrypt(record);
        result.map_err(|e| self.fatal(e))
    }

    /// Sends one plaintext over the channel's own link as one or more
    /// records, batching eligible records when enabled.
    pub fn send(&self, plain: &[u8]) -> Result<(), SecureError> {
        if !self.is_established() {
            return Err(SecureError::NotEstablished);
        }
        let target = if self.config.adaptive.enabled {
            self.sizer.lock().unwrap().current_size().max(1)
        } else {
            usize::MAX
        };

        let mut chunks: Vec<&[u8]> = Vec::new();
        if plain.is_empty() {
            chunks.push(plain);
        } else {
            for chunk in plain.chunks(target) {
                chunks.push(chunk);
            }
        }

        for chunk in chunks {
            let record = self.encrypt_record(chunk)?;
            let batched = self.config.batching.enabled
                && chunk.len() >= self.config.batching.min_message_size;
            if batched {
                if let Some(batcher) = self.batcher.lock().unwrap().as_ref() {
                    batcher.enqueue(record);
                    continue;
                }
            }
            self.link.send_frame(&record_frame(&[record]))?;
        }
        Ok(())
    }

    /// Vectored send: above the coalescing threshold every buffer becomes
    /// its own record and all frames go out as one vectored write.
    pub fn sendv(&self, buffers: &[Vec<u8>]) -> Result<(), SecureError> {
        if !self.is_established() {
            return Err(SecureError::NotEstablished);
        }
        let total: usize = buffers.iter().map(Vec::len).sum();
        if total > VECTORED_THRESHOLD && buffers.len() > 1 {
            let mut frames = Vec::with_capacity(buffers.len());
            for buffer in buffers {
                let record = self.encrypt_record(buffer)?;
                frames.push(record_frame(&[record]));
            }
            self.link.send_frames(&frames)?;
            Ok(())
        } else {
            for buffer in buffers {
                self.send(buffer)?;
            }
            Ok(())
        }
    }

    /// Receives the next plaintext from the channel's own link.
    pub fn recv(&self, timeout: Duration) -> Result<Vec<u8>, SecureError> {
        let deadline = self.time.now_instant() + timeout;
        loop {
            if let Some(plain) = self.pending_plain.lock().unwrap().pop_front() {
                return Ok(plain);
            }
            let remaining = deadline.saturating_duration_since(self.time.now_instant());
            if remaining.is_zero() {
                return Err(SecureError::Link(LinkError::Timeout(timeout)));
            }
            let frame = self.link.recv_frame(remaining)?;
            match frame.first().copied() {
                Some(frame_type::RECORD) => {
                    let mut decrypted = Vec::new();
                    for record in split_record_frame(&frame).map_err(|e| self.fatal(e))? {
                        decrypted.push(self.decrypt_record(record)?);
                    }
                    self.pending_plain.lock().unwrap().extend(decrypted);
                }
                Some(frame_type::CLOSE_NOTIFY) => {
                    self.established.store(false, Ordering::SeqCst);
                    self.ctx.lock().unwrap().shutdown();
                    return Err(SecureError::Closed);
                }
                Some(other) => return Err(SecureError::UnexpectedFrame(other)),
                None => return Err(SecureError::MalformedRecord("empty frame")),
            }
        }
    }

    /// Feeds an RTT observation for a record send into adaptive sizing.
    pub fn record_rtt_sample(&self, rtt: Duration) {
        let now = self.time.now_instant();
        let mut sizer = self.sizer.lock().unwrap();
        sizer.add_sample(rtt, now);
        sizer.maybe_adjust(now);
    }

    pub fn current_record_size(&self) -> usize {
        self.sizer.lock().unwrap().current_size()
    }

    pub fn queued_batch_records(&self) -> usize {
        self.batcher
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, RecordBatcher::queued_records)
    }

    /// Tears the channel down: flush batches, cache resumption data,
    /// best-effort close-notify, release keys.
    pub fn shutdown(&self) {
        if let Some(mut batcher) = self.batcher.lock().unwrap().take() {
            batcher.shutdown(&*self.link);
        }

        let mut ctx = self.ctx.lock().unwrap();
        if self.config.enable_session_resumption {
            if let Some(secret) = ctx.session_secret() {
                self.resumption
                    .lock()
                    .unwrap()
                    .insert(self.peer_label.clone(), secret);
            }
        }
        if self.is_established() {
            if let Err(e) = self.link.send_frame(&close_notify_frame()) {
                tracing::debug!("close-notify to {} not delivered: {e}", self.peer_label);
            }
        }
        ctx.shutdown();
        drop(ctx);

        self.established.store(false, Ordering::SeqCst);
        self.sizer.lock().unwrap().clear();
    }

    /// Discards the current context and performs a fresh handshake.
    pub fn renegotiate(&self) -> Result<(), SecureError> {
        self.shutdown();
        *self.ctx.lock().unwrap() = (self.ctx_factory)();
        self.establish()
    }

    pub fn resumption_secret(&self, peer: &str) -> Option<[u8; 32]> {
        self.resumption.lock().unwrap().entries.get(peer).copied()
    }

    pub fn resumption_cache_len(&self) -> usize {
        self.resumption.lock().unwrap().entries.len()
    }
}

/// Splits a RECORD frame into its length-prefixed record entries.
fn split_record_frame(frame: &[u8]) -> Result<Vec<&[u8]>, SecureError> {
    let mut records = Vec::new();
    let mut rest = &frame[1..];
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(SecureError::MalformedRecord("truncated record length"));
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(SecureError::MalformedRecord("truncated record body"));
        }
        records.push(&rest[..len]);
        rest = &rest[len..];
    }
    Ok(records)
}
