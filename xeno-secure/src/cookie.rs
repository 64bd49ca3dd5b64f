use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use xeno_wire::TimeProvider;

/// Stateless-cookie tag length appended to the issue timestamp.
const COOKIE_TAG_LEN: usize = 16;
/// Cookie layout: unix seconds (8) + truncated keyed hash (16).
pub const COOKIE_LEN: usize = 8 + COOKIE_TAG_LEN;

/// Default cookie lifetime.
pub const DEFAULT_COOKIE_LIFETIME: Duration = Duration::from_secs(300);

/// Issues and verifies datagram handshake cookies.
///
/// The cookie binds the peer's address label and the issue time under a
/// per-process secret, so a server commits no per-client state before the
/// second ClientHello.
pub struct CookieJar {
    secret: [u8; 32],
    lifetime: Duration,
    time: Arc<dyn TimeProvider>,
}

impl CookieJar {
    pub fn new(secret: [u8; 32], lifetime: Duration, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            secret,
            lifetime,
            time,
        }
    }

    pub fn with_random_secret(rng: &mut dyn rand::RngCore, time: Arc<dyn TimeProvider>) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::new(secret, DEFAULT_COOKIE_LIFETIME, time)
    }

    fn tag(&self, peer: &str, issued_secs: u64) -> [u8; COOKIE_TAG_LEN] {
        let mut material = Vec::with_capacity(peer.len() + 8);
        material.extend_from_slice(peer.as_bytes());
        material.extend_from_slice(&issued_secs.to_le_bytes());
        let hash = blake3::keyed_hash(&self.secret, &material);
        let mut tag = [0u8; COOKIE_TAG_LEN];
        tag.copy_from_slice(&hash.as_bytes()[..COOKIE_TAG_LEN]);
        tag
    }

    fn now_secs(&self) -> u64 {
        self.time
            .now_system()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    pub fn issue(&self, peer: &str) -> Vec<u8> {
        let issued = self.now_secs();
        let mut cookie = Vec::with_capacity(COOKIE_LEN);
        cookie.extend_from_slice(&issued.to_le_bytes());
        cookie.extend_from_slice(&self.tag(peer, issued));
        cookie
    }

    pub fn verify(&self, peer: &str, cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_LEN {
            return false;
        }
        let mut issued_bytes = [0u8; 8];
        issued_bytes.copy_from_slice(&cookie[..8]);
        let issued = u64::from_le_bytes(issued_bytes);

        let now = self.now_secs();
        if now < issued || now - issued > self.lifetime.as_secs() {
            return false;
        }

        let expected = self.tag(peer, issued);
        expected.ct_eq(&cookie[8..]).into()
    }
}
