//! Trust policy: sender patterns and room allowlists with atomic swap.
//!
//! Readers take an [`Arc`] snapshot, so a concurrent policy update is
//! observed either entirely or not at all, never a torn mix.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// An immutable trust-policy snapshot.
///
/// Sender entries are either exact strings or wildcards of the form
/// `*<sep><domain>`, where `<sep>` is the single character at index 1
/// (typically `@` or `:`). Room entries are exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    /// Allowed sender patterns.
    pub senders: BTreeSet<String>,
    /// Allowed room IDs.
    pub rooms: BTreeSet<String>,
}

impl TrustPolicy {
    /// Whether `sender` matches any configured pattern.
    ///
    /// With an empty set this returns `false`; the gate decides whether
    /// empty means deny-all (default) or legacy allow-all.
    pub fn sender_matches(&self, sender: &str) -> bool {
        self.senders.iter().any(|p| pattern_matches(p, sender))
    }

    /// Whether `room` is in the allowlist.
    pub fn room_matches(&self, room: &str) -> bool {
        self.rooms.contains(room)
    }
}

/// Match one sender pattern against a sender string.
///
/// Exact equality always matches. A pattern beginning with `*` matches
/// iff the sender ends with everything after the `*` (separator
/// included) and is strictly longer than that suffix. Any other shape
/// never matches.
fn pattern_matches(pattern: &str, sender: &str) -> bool {
    if pattern == sender {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        // The suffix must carry at least a separator and a domain.
        if suffix.len() < 2 {
            return false;
        }
        return sender.ends_with(suffix) && sender.len() > suffix.len();
    }
    false
}

/// Shared, atomically swappable policy handle.
///
/// Writers replace the whole `Arc`; readers clone it. No lock is held
/// while a snapshot is in use.
pub struct PolicyHandle {
    current: RwLock<Arc<TrustPolicy>>,
}

impl PolicyHandle {
    /// Start with an empty policy.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TrustPolicy::default())),
        }
    }

    /// Take the current snapshot.
    pub fn snapshot(&self) -> Arc<TrustPolicy> {
        self.current.read().expect("policy lock").clone()
    }

    /// Replace the sender set.
    pub fn set_trusted_senders(&self, senders: impl IntoIterator<Item = String>) {
        let mut guard = self.current.write().expect("policy lock");
        let mut next = (**guard).clone();
        next.senders = senders.into_iter().collect();
        *guard = Arc::new(next);
    }

    /// Replace the room set.
    pub fn set_trusted_rooms(&self, rooms: impl IntoIterator<Item = String>) {
        let mut guard = self.current.write().expect("policy lock");
        let mut next = (**guard).clone();
        next.rooms = rooms.into_iter().collect();
        *guard = Arc::new(next);
    }

    /// The configured sender patterns, as a set.
    pub fn get_trusted_senders(&self) -> BTreeSet<String> {
        self.snapshot().senders.clone()
    }

    /// The configured room IDs, as a set.
    pub fn get_trusted_rooms(&self) -> BTreeSet<String> {
        self.snapshot().rooms.clone()
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new()
    }
}
