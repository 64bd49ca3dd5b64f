use crate::context::{Bio, HandshakeStatus, SecureContext};
use crate::cookie::CookieJar;
use crate::error::SecureError;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use rand::RngCore;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};

/// Frame discriminants on a secure link.
pub mod frame_type {
    pub const CLIENT_HELLO: u8 = 1;
    pub const COOKIE_RETRY: u8 = 2;
    pub const SERVER_HELLO: u8 = 3;
    pub const CLOSE_NOTIFY: u8 = 4;
    pub const RECORD: u8 = 5;
    pub const RESUME_HELLO: u8 = 6;
    pub const RESUME_ACCEPT: u8 = 7;
    pub const RESUME_REJECT: u8 = 8;
}

const HELLO_NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
/// Sequence prefix plus MAC suffix around every ciphertext.
pub const RECORD_OVERHEAD: usize = 8 + MAC_LEN;

pub fn close_notify_frame() -> Vec<u8> {
    vec![frame_type::CLOSE_NOTIFY]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ClientStart,
    ClientAwaitResume,
    ClientAwaitResponse,
    ServerAwaitHello,
    ServerHelloQueued,
    Established,
    Failed,
    Shutdown,
}

/// Sliding anti-replay window over record sequence numbers, 64 deep.
#[derive(Debug, Default)]
struct ReplayWindow {
    highest: u64,
    mask: u64,
    primed: bool,
}

impl ReplayWindow {
    fn check_and_update(&mut self, seq: u64) -> bool {
        if !self.primed {
            self.primed = true;
            self.highest = seq;
            self.mask = 1;
            return true;
        }
        if seq > self.highest {
            let shift = seq - self.highest;
            self.mask = if shift >= 64 { 0 } else { self.mask << shift };
            self.mask |= 1;
            self.highest = seq;
            true
        } else {
            let offset = self.highest - seq;
            if offset >= 64 || self.mask & (1 << offset) != 0 {
                false
            } else {
                self.mask |= 1 << offset;
                true
            }
        }
    }
}

struct DirectionKeys {
    enc: [u8; 32],
    mac: [u8; 32],
    seq: u64,
    replay: ReplayWindow,
}

impl DirectionKeys {
    fn new(enc: [u8; 32], mac: [u8; 32]) -> Self {
        Self {
            enc,
            mac,
            seq: 0,
            replay: ReplayWindow::default(),
        }
    }
}

fn record_nonce(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&seq.to_le_bytes());
    nonce
}

fn record_mac(key: &[u8; 32], seq: u64, ciphertext: &[u8]) -> [u8; 32] {
    let mut material = Vec::with_capacity(8 + ciphertext.len());
    material.extend_from_slice(&seq.to_le_bytes());
    material.extend_from_slice(ciphertext);
    *blake3::keyed_hash(key, &material).as_bytes()
}

/// Authentication key for the abbreviated handshake, derived from a
/// cached session secret.
fn resume_auth_key(secret: &[u8; 32]) -> [u8; 32] {
    blake3::derive_key("xenocomm v1 resume auth", secret)
}

/// The concrete secure context: X25519 ephemeral key agreement, a BLAKE3
/// key schedule with versioned context strings, ChaCha20 record
/// encryption, and keyed-BLAKE3 record MACs.
pub struct XenoContext {
    role: HandshakeRole,
    state: State,
    local_secret: Option<StaticSecret>,
    local_public: [u8; 32],
    local_nonce: [u8; HELLO_NONCE_LEN],
    /// Client: cookie echoed from a COOKIE_RETRY.
    cookie: Option<Vec<u8>>,
    /// Server: cookie policy for datagram links; `None` skips the exchange.
    cookie_jar: Option<CookieJar>,
    peer_label: String,
    peer_public: Option<[u8; 32]>,
    /// Cached session secret offered for an abbreviated handshake.
    resume_secret: Option<[u8; 32]>,
    resumed: bool,
    send: Option<DirectionKeys>,
    recv: Option<DirectionKeys>,
    session_secret: Option<[u8; 32]>,
}

impl XenoContext {
    fn new(role: HandshakeRole, peer_label: &str, rng: &mut dyn RngCore) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        let mut nonce = [0u8; HELLO_NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        Self {
            role,
            state: match role {
                HandshakeRole::Client => State::ClientStart,
                HandshakeRole::Server => State::ServerAwaitHello,
            },
            local_secret: Some(secret),
            local_public: *public.as_bytes(),
            local_nonce: nonce,
            cookie: None,
            cookie_jar: None,
            peer_label: peer_label.to_string(),
            peer_public: None,
            resume_secret: None,
            resumed: false,
            send: None,
            recv: None,
            session_secret: None,
        }
    }

    pub fn client(peer_label: &str, rng: &mut dyn RngCore) -> Self {
        Self::new(HandshakeRole::Client, peer_label, rng)
    }

    pub fn server(peer_label: &str, rng: &mut dyn RngCore) -> Self {
        Self::new(HandshakeRole::Server, peer_label, rng)
    }

    /// Server flavor for datagram links: demand a valid cookie before
    /// committing to the full handshake.
    pub fn server_with_cookies(
        peer_label: &str,
        cookie_jar: CookieJar,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut ctx = Self::new(HandshakeRole::Server, peer_label, rng);
        ctx.cookie_jar = Some(cookie_jar);
        ctx
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    fn fail(&mut self, reason: &str) -> HandshakeStatus {
        tracing::warn!("handshake with {} failed: {reason}", self.peer_label);
        self.state = State::Failed;
        HandshakeStatus::Failed(reason.to_string())
    }

    fn client_hello(&self) -> Vec<u8> {
        let cookie = self.cookie.as_deref().unwrap_or(&[]);
        let mut frame = Vec::with_capacity(1 + 32 + HELLO_NONCE_LEN + 2 + cookie.len());
        frame.push(frame_type::CLIENT_HELLO);
        frame.extend_from_slice(&self.local_public);
        frame.extend_from_slice(&self.local_nonce);
        frame.extend_from_slice(&(cookie.len() as u16).to_le_bytes());
        frame.extend_from_slice(cookie);
        frame
    }

    /// Installs directional record keys and the exporter secret from the
    /// input key material, by role.
    fn install_keys(&mut self, ikm: &[u8]) {
        let c2s_enc = blake3::derive_key("xenocomm v1 c2s enc", ikm);
        let c2s_mac = blake3::derive_key("xenocomm v1 c2s mac", ikm);
        let s2c_enc = blake3::derive_key("xenocomm v1 s2c enc", ikm);
        let s2c_mac = blake3::derive_key("xenocomm v1 s2c mac", ikm);
        self.session_secret = Some(blake3::derive_key("xenocomm v1 exporter", ikm));

        match self.role {
            HandshakeRole::Client => {
                self.send = Some(DirectionKeys::new(c2s_enc, c2s_mac));
                self.recv = Some(DirectionKeys::new(s2c_enc, s2c_mac));
            }
            HandshakeRole::Server => {
                self.send = Some(DirectionKeys::new(s2c_enc, s2c_mac));
                self.recv = Some(DirectionKeys::new(c2s_enc, c2s_mac));
            }
        }
    }

    /// Derives directional keys. `client_*`/`server_*` are the hello cores
    /// regardless of our own role.
    fn derive_keys(
        &mut self,
        peer_public: [u8; 32],
        client_nonce: [u8; HELLO_NONCE_LEN],
        server_nonce: [u8; HELLO_NONCE_LEN],
    ) -> Result<[u8; 32], String> {
        let secret = self
            .local_secret
            .take()
            .ok_or_else(|| "ephemeral secret already consumed".to_string())?;
        let shared = secret.diffie_hellman(&PublicKey::from(peer_public));

        let mut ikm = Vec::with_capacity(32 + 2 * HELLO_NONCE_LEN);
        ikm.extend_from_slice(shared.as_bytes());
        ikm.extend_from_slice(&client_nonce);
        ikm.extend_from_slice(&server_nonce);

        let confirm_key = blake3::derive_key("xenocomm v1 confirm", &ikm);
        self.install_keys(&ikm);
        self.peer_public = Some(peer_public);
        tracing::debug!(
            "derived record keys with {} (peer pk {})",
            self.peer_label,
            hex::encode(&peer_public[..8])
        );
        Ok(confirm_key)
    }

    /// Installs keys from a cached session secret plus both nonces, for
    /// the abbreviated handshake. The exporter is re-derived, so each
    /// resumption rotates the cached secret.
    fn install_resumed_keys(
        &mut self,
        secret: &[u8; 32],
        client_nonce: &[u8; HELLO_NONCE_LEN],
        server_nonce: &[u8; HELLO_NONCE_LEN],
    ) {
        let mut ikm = Vec::with_capacity(32 + 2 * HELLO_NONCE_LEN);
        ikm.extend_from_slice(secret);
        ikm.extend_from_slice(client_nonce);
        ikm.extend_from_slice(server_nonce);
        self.install_keys(&ikm);
        self.resumed = true;
        tracing::debug!("resumed record keys with {}", self.peer_label);
    }

    fn resume_hello(&self, secret: &[u8; 32]) -> Vec<u8> {
        let auth = resume_auth_key(secret);
        let tag = blake3::keyed_hash(&auth, &self.local_nonce);
        let mut frame = Vec::with_capacity(1 + HELLO_NONCE_LEN + MAC_LEN);
        frame.push(frame_type::RESUME_HELLO);
        frame.extend_from_slice(&self.local_nonce);
        frame.extend_from_slice(tag.as_bytes());
        frame
    }

    fn resume_confirm(
        secret: &[u8; 32],
        client_nonce: &[u8; HELLO_NONCE_LEN],
        server_nonce: &[u8; HELLO_NONCE_LEN],
    ) -> [u8; 32] {
        let auth = resume_auth_key(secret);
        let mut material = Vec::with_capacity(2 * HELLO_NONCE_LEN);
        material.extend_from_slice(client_nonce);
        material.extend_from_slice(server_nonce);
        *blake3::keyed_hash(&auth, &material).as_bytes()
    }

    fn confirm_tag(
        confirm_key: &[u8; 32],
        client_public: &[u8; 32],
        client_nonce: &[u8; HELLO_NONCE_LEN],
        server_public: &[u8; 32],
        server_nonce: &[u8; HELLO_NONCE_LEN],
    ) -> [u8; 32] {
        let mut transcript = Vec::with_capacity(2 * (32 + HELLO_NONCE_LEN));
        transcript.extend_from_slice(client_public);
        transcript.extend_from_slice(client_nonce);
        transcript.extend_from_slice(server_public);
        transcript.extend_from_slice(server_nonce);
        *blake3::keyed_hash(confirm_key, &transcript).as_bytes()
    }

    fn step_client(&mut self, bio: &mut Bio) -> HandshakeStatus {
        match self.state {
            State::ClientStart => {
                if let Some(secret) = self.resume_secret {
                    bio.outgoing.push_back(self.resume_hello(&secret));
                    self.state = State::ClientAwaitResume;
                } else {
                    bio.outgoing.push_back(self.client_hello());
                    self.state = State::ClientAwaitResponse;
                }
                HandshakeStatus::WantWrite
            }
            State::ClientAwaitResume => {
                let frame = match bio.incoming.pop_front() {
                    Some(f) => f,
                    None => return HandshakeStatus::WantRead,
                };
                match frame.first().copied() {
                    Some(frame_type::RESUME_ACCEPT) => {
                        if frame.len() != 1 + HELLO_NONCE_LEN + MAC_LEN {
                            return self.fail("malformed resume accept");
                        }
                        let secret = match self.resume_secret.take() {
                            Some(secret) => secret,
                            None => return self.fail("resume accept without offered secret"),
                        };
                        let mut server_nonce = [0u8; HELLO_NONCE_LEN];
                        server_nonce.copy_from_slice(&frame[1..1 + HELLO_NONCE_LEN]);
                        let received_confirm = &frame[1 + HELLO_NONCE_LEN..];

                        let client_nonce = self.local_nonce;
                        let expected =
                            Self::resume_confirm(&secret, &client_nonce, &server_nonce);
                        let matches: bool = expected.ct_eq(received_confirm).into();
                        if !matches {
                            return self.fail("resume confirmation tag mismatch");
                        }
                        self.install_resumed_keys(&secret, &client_nonce, &server_nonce);
                        self.state = State::Established;
                        HandshakeStatus::Done
                    }
                    Some(frame_type::RESUME_REJECT) => {
                        // Cached session unknown to the peer; fall back to
                        // the full exchange.
                        self.resume_secret = None;
                        bio.outgoing.push_back(self.client_hello());
                        self.state = State::ClientAwaitResponse;
                        HandshakeStatus::WantWrite
                    }
                    Some(frame_type::CLOSE_NOTIFY) | Some(frame_type::RECORD) => {
                        HandshakeStatus::WantRead
                    }
                    _ => self.fail("unexpected frame during resumption"),
                }
            }
            State::ClientAwaitResponse => {
                let frame = match bio.incoming.pop_front() {
                    Some(f) => f,
                    None => return HandshakeStatus::WantRead,
                };
                match frame.first().copied() {
                    Some(frame_type::COOKIE_RETRY) => {
                        if frame.len() < 3 {
                            return self.fail("truncated cookie retry");
                        }
                        let len = u16::from_le_bytes([frame[1], frame[2]]) as usize;
                        if frame.len() != 3 + len {
                            return self.fail("cookie retry length mismatch");
                        }
                        self.cookie = Some(frame[3..].to_vec());
                        bio.outgoing.push_back(self.client_hello());
                        HandshakeStatus::WantWrite
                    }
                    // Stale frames from a previous epoch; a renegotiating
                    // peer may still be flushing them.
                    Some(frame_type::CLOSE_NOTIFY) | Some(frame_type::RECORD) => {
                        HandshakeStatus::WantRead
                    }
                    Some(frame_type::SERVER_HELLO) => {
                        if frame.len() != 1 + 32 + HELLO_NONCE_LEN + MAC_LEN {
                            return self.fail("malformed server hello");
                        }
                        let mut server_public = [0u8; 32];
                        server_public.copy_from_slice(&frame[1..33]);
                        let mut server_nonce = [0u8; HELLO_NONCE_LEN];
                        server_nonce.copy_from_slice(&frame[33..33 + HELLO_NONCE_LEN]);
                        let received_confirm = &frame[33 + HELLO_NONCE_LEN..];

                        let client_public = self.local_public;
                        let client_nonce = self.local_nonce;
                        let confirm_key =
                            match self.derive_keys(server_public, client_nonce, server_nonce) {
                                Ok(k) => k,
                                Err(e) => return self.fail(&e),
                            };
                        let expected = Self::confirm_tag(
                            &confirm_key,
                            &client_public,
                            &client_nonce,
                            &server_public,
                            &server_nonce,
                        );
                        let matches: bool = expected.ct_eq(received_confirm).into();
                        if !matches {
                            return self.fail("server confirmation tag mismatch");
                        }
                        self.state = State::Established;
                        HandshakeStatus::Done
                    }
                    _ => self.fail("unexpected frame during client handshake"),
                }
            }
            State::Established => HandshakeStatus::Done,
            State::Failed => HandshakeStatus::Failed("handshake already failed".to_string()),
            _ => self.fail("client context in server state"),
        }
    }

    /// Server half of the abbreviated handshake. The tag proves the peer
    /// holds the cached secret, so no cookie round trip is needed; an
    /// unknown or stale session is refused and the client falls back to
    /// the full exchange.
    fn handle_resume_hello(&mut self, frame: &[u8], bio: &mut Bio) -> HandshakeStatus {
        let verified = match self.resume_secret {
            Some(secret) if frame.len() == 1 + HELLO_NONCE_LEN + MAC_LEN => {
                let auth = resume_auth_key(&secret);
                let tag = blake3::keyed_hash(&auth, &frame[1..1 + HELLO_NONCE_LEN]);
                let matches: bool =
                    tag.as_bytes().ct_eq(&frame[1 + HELLO_NONCE_LEN..]).into();
                if matches {
                    Some(secret)
                } else {
                    None
                }
            }
            _ => None,
        };
        let secret = match verified {
            Some(secret) => secret,
            None => {
                tracing::debug!(
                    "refusing session resumption from {} ({} cached)",
                    self.peer_label,
                    if self.resume_secret.is_some() {
                        "secret"
                    } else {
                        "nothing"
                    }
                );
                bio.outgoing.push_back(vec![frame_type::RESUME_REJECT]);
                return HandshakeStatus::WantWrite;
            }
        };
        self.resume_secret = None;
        let mut client_nonce = [0u8; HELLO_NONCE_LEN];
        client_nonce.copy_from_slice(&frame[1..1 + HELLO_NONCE_LEN]);
        let server_nonce = self.local_nonce;
        let confirm = Self::resume_confirm(&secret, &client_nonce, &server_nonce);
        self.install_resumed_keys(&secret, &client_nonce, &server_nonce);

        let mut accept = Vec::with_capacity(1 + HELLO_NONCE_LEN + MAC_LEN);
        accept.push(frame_type::RESUME_ACCEPT);
        accept.extend_from_slice(&server_nonce);
        accept.extend_from_slice(&confirm);
        bio.outgoing.push_back(accept);
        self.state = State::ServerHelloQueued;
        HandshakeStatus::WantWrite
    }

    fn step_server(&mut self, bio: &mut Bio) -> HandshakeStatus {
        match self.state {
            State::ServerAwaitHello => {
                let frame = match bio.incoming.pop_front() {
                    Some(f) => f,
                    None => return HandshakeStatus::WantRead,
                };
                match frame.first().copied() {
                    Some(frame_type::CLIENT_HELLO) => {}
                    Some(frame_type::RESUME_HELLO) => {
                        return self.handle_resume_hello(&frame, bio);
                    }
                    Some(frame_type::CLOSE_NOTIFY) | Some(frame_type::RECORD) => {
                        return HandshakeStatus::WantRead;
                    }
                    _ => return self.fail("expected client hello"),
                }
                if frame.len() < 1 + 32 + HELLO_NONCE_LEN + 2 {
                    return self.fail("truncated client hello");
                }
                let mut client_public = [0u8; 32];
                client_public.copy_from_slice(&frame[1..33]);
                let mut client_nonce = [0u8; HELLO_NONCE_LEN];
                client_nonce.copy_from_slice(&frame[33..33 + HELLO_NONCE_LEN]);
                let cookie_off = 33 + HELLO_NONCE_LEN;
                let cookie_len =
                    u16::from_le_bytes([frame[cookie_off], frame[cookie_off + 1]]) as usize;
                if frame.len() != cookie_off + 2 + cookie_len {
                    return self.fail("client hello length mismatch");
                }
                let cookie = &frame[cookie_off + 2..];

                if let Some(jar) = &self.cookie_jar {
                    if !jar.verify(&self.peer_label, cookie) {
                        tracing::debug!(
                            "issuing handshake cookie to {} (got {} cookie bytes)",
                            self.peer_label,
                            cookie.len()
                        );
                        let fresh = jar.issue(&self.peer_label);
                        let mut retry = Vec::with_capacity(3 + fresh.len());
                        retry.push(frame_type::COOKIE_RETRY);
                        retry.extend_from_slice(&(fresh.len() as u16).to_le_bytes());
                        retry.extend_from_slice(&fresh);
                        bio.outgoing.push_back(retry);
                        return HandshakeStatus::WantWrite;
                    }
                }

                let server_public = self.local_public;
                let server_nonce = self.local_nonce;
                let confirm_key = match self.derive_keys(client_public, client_nonce, server_nonce)
                {
                    Ok(k) => k,
                    Err(e) => return self.fail(&e),
                };
                let confirm = Self::confirm_tag(
                    &confirm_key,
                    &client_public,
                    &client_nonce,
                    &server_public,
                    &server_nonce,
                );

                let mut hello = Vec::with_capacity(1 + 32 + HELLO_NONCE_LEN + MAC_LEN);
                hello.push(frame_type::SERVER_HELLO);
                hello.extend_from_slice(&server_public);
                hello.extend_from_slice(&server_nonce);
                hello.extend_from_slice(&confirm);
                bio.outgoing.push_back(hello);
                self.state = State::ServerHelloQueued;
                HandshakeStatus::WantWrite
            }
            State::ServerHelloQueued => {
                self.state = State::Established;
                HandshakeStatus::Done
            }
            State::Established => HandshakeStatus::Done,
            State::Failed => HandshakeStatus::Failed("handshake already failed".to_string()),
            _ => self.fail("server context in client state"),
        }
    }
}

impl SecureContext for XenoContext {
    fn do_handshake_step(&mut self, bio: &mut Bio) -> HandshakeStatus {
        match self.role {
            HandshakeRole::Client => self.step_client(bio),
            HandshakeRole::Server => self.step_server(bio),
        }
    }

    fn is_established(&self) -> bool {
        self.state == State::Established
    }

    fn offer_resumption(&mut self, secret: [u8; 32]) -> bool {
        match self.state {
            State::ClientStart | State::ServerAwaitHello => {
                self.resume_secret = Some(secret);
                true
            }
            _ => false,
        }
    }

    fn was_resumed(&self) -> bool {
        self.resumed
    }

    fn encrypt(&mut self, plain: &[u8]) -> Result<Vec<u8>, SecureError> {
        if self.state != State::Established {
            return Err(SecureError::NotEstablished);
        }
        let keys = self.send.as_mut().ok_or(SecureError::NotEstablished)?;
        let seq = keys.seq;
        keys.seq += 1;

        let mut ciphertext = plain.to_vec();
        let mut cipher = ChaCha20::new(&keys.enc.into(), &record_nonce(seq).into());
        cipher.apply_keystream(&mut ciphertext);

        let mac = record_mac(&keys.mac, seq, &ciphertext);
        let mut record = Vec::with_capacity(RECORD_OVERHEAD + ciphertext.len());
        record.extend_from_slice(&seq.to_le_bytes());
        record.extend_from_slice(&ciphertext);
        record.extend_from_slice(&mac);
        Ok(record)
    }

    fn decrypt(&mut self, record: &[u8]) -> Result<Vec<u8>, SecureError> {
        if self.state != State::Established {
            return Err(SecureError::NotEstablished);
        }
        if record.len() < RECORD_OVERHEAD {
            return Err(SecureError::MalformedRecord("record shorter than overhead"));
        }
        let keys = self.recv.as_mut().ok_or(SecureError::NotEstablished)?;

        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&record[..8]);
        let seq = u64::from_le_bytes(seq_bytes);
        let ciphertext = &record[8..record.len() - MAC_LEN];
        let received_mac = &record[record.len() - MAC_LEN..];

        let expected = record_mac(&keys.mac, seq, ciphertext);
        let mac_ok: bool = expected.ct_eq(received_mac).into();
        if !mac_ok {
            return Err(SecureError::BadRecordMac);
        }
        if !keys.replay.check_and_update(seq) {
            return Err(SecureError::Replay(seq));
        }

        let mut plain = ciphertext.to_vec();
        let mut cipher = ChaCha20::new(&keys.enc.into(), &record_nonce(seq).into());
        cipher.apply_keystream(&mut plain);
        Ok(plain)
    }

    fn shutdown(&mut self) {
        self.send = None;
        self.recv = None;
        self.local_secret = None;
        self.resume_secret = None;
        self.state = State::Shutdown;
    }

    fn cipher_suite(&self) -> &'static str {
        "X25519-CHACHA20-BLAKE3"
    }

    fn protocol_version(&self) -> &'static str {
        "xeno/1"
    }

    fn peer_identity(&self) -> Option<String> {
        if self.resumed {
            // No fresh ephemeral key on the abbreviated path; identity is
            // the cached-session binding itself.
            return Some(format!("{} (resumed)", self.peer_label));
        }
        self.peer_public
            .map(|pk| format!("{}:{}", self.peer_label, hex::encode(&pk[..8])))
    }

    fn session_secret(&self) -> Option<[u8; 32]> {
        self.session_secret
    }
}
