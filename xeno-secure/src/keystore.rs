use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use uuid::Uuid;
use xeno_wire::TimeProvider;

/// A key held by the store with its lifecycle metadata.
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub material: [u8; 32],
    pub created_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub revoked: bool,
}

impl StoredKey {
    fn usable(&self, now: SystemTime) -> bool {
        !self.revoked && self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-wide store for keys produced by key exchange, keyed by UUID.
///
/// Explicitly constructed and passed by reference into the components
/// that need it; never module-level state.
pub struct KeyStore {
    entries: Mutex<HashMap<Uuid, StoredKey>>,
    time: Arc<dyn TimeProvider>,
}

impl KeyStore {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            time,
        }
    }

    pub fn insert(&self, material: [u8; 32], ttl: Option<Duration>) -> Uuid {
        let now = self.time.now_system();
        let id = Uuid::new_v4();
        let key = StoredKey {
            material,
            created_at: now,
            expires_at: ttl.map(|t| now + t),
            revoked: false,
        };
        self.entries.lock().unwrap().insert(id, key);
        id
    }

    /// Returns the key material if the key exists, is unrevoked, and is
    /// unexpired.
    pub fn material(&self, id: &Uuid) -> Option<[u8; 32]> {
        let now = self.time.now_system();
        let entries = self.entries.lock().unwrap();
        entries
            .get(id)
            .filter(|k| k.usable(now))
            .map(|k| k.material)
    }

    pub fn metadata(&self, id: &Uuid) -> Option<StoredKey> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    pub fn revoke(&self, id: &Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(id) {
            Some(key) => {
                key.revoked = true;
                true
            }
            None => false,
        }
    }

    /// Derives a successor key from `id`, stores it with the same TTL
    /// policy, and revokes the original.
    pub fn rotate(&self, id: &Uuid) -> Option<Uuid> {
        let now = self.time.now_system();
        let mut entries = self.entries.lock().unwrap();
        let current = entries.get_mut(id)?;
        if !current.usable(now) {
            return None;
        }
        let ttl = current
            .expires_at
            .and_then(|at| at.duration_since(current.created_at).ok());
        let material = blake3::derive_key("xenocomm v1 key rotation", &current.material);
        current.revoked = true;

        let next_id = Uuid::new_v4();
        entries.insert(
            next_id,
            StoredKey {
                material,
                created_at: now,
                expires_at: ttl.map(|t| now + t),
                revoked: false,
            },
        );
        Some(next_id)
    }

    /// Removes expired and revoked keys, returning how many were reaped.
    pub fn reap(&self) -> usize {
        let now = self.time.now_system();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, key| key.usable(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
