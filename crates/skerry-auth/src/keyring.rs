//! Long-lived principal secrets and rotating service keys.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use skerry_types::EntityName;

/// A fixed 256-bit shared secret.
///
/// `Debug` never prints key material.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// In-memory map of principal names to their long-lived secrets.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: HashMap<EntityName, Secret>,
}

impl Keyring {
    /// Create an empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the secret for a principal.
    pub fn insert(&mut self, name: EntityName, secret: Secret) {
        self.keys.insert(name, secret);
    }

    /// Look up the secret for a principal.
    pub fn get(&self, name: &EntityName) -> Option<Secret> {
        self.keys.get(name).copied()
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no secrets are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One time-bounded rotating service key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatingSecret {
    /// Monotonically increasing key id.
    pub id: u64,
    /// The key itself.
    pub key: Secret,
    /// When this key stops being valid.
    pub expires: SystemTime,
}

/// The set of rotating service keys delivered by the monitor.
///
/// Daemon principals keep a small window of these alive; the session
/// client refreshes them when the earliest expiry approaches.
#[derive(Debug, Default)]
pub struct RotatingSecrets {
    secrets: BTreeMap<u64, RotatingSecret>,
}

/// Rotating secrets shared between the session client and the auth
/// handler. Writes happen only on the auth reply path; everyone else
/// takes short read locks.
pub type SharedRotating = Arc<Mutex<RotatingSecrets>>;

impl RotatingSecrets {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a key by id.
    pub fn insert(&mut self, secret: RotatingSecret) {
        self.secrets.insert(secret.id, secret);
    }

    /// True when a refresh is due: the set is empty, or the earliest
    /// expiry is at or before `cutoff`.
    pub fn need_new_secrets(&self, cutoff: SystemTime) -> bool {
        match self.secrets.values().map(|s| s.expires).min() {
            None => true,
            Some(earliest) => earliest <= cutoff,
        }
    }

    /// [`need_new_secrets`](Self::need_new_secrets) against the current time.
    pub fn need_new_secrets_now(&self) -> bool {
        self.need_new_secrets(SystemTime::now())
    }

    /// Drop keys that expired before `now`.
    pub fn prune_expired(&mut self, now: SystemTime) {
        self.secrets.retain(|_, s| s.expires > now);
    }

    /// The newest key, if any.
    pub fn current(&self) -> Option<&RotatingSecret> {
        self.secrets.values().next_back()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// True when no keys are held.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
