//! Audit entries and their canonical serialization.
//!
//! The hash over an entry must be reproducible bit-for-bit on every
//! machine that ever verifies the chain. Canonical form is therefore a
//! plain struct serialization with a fixed field declaration order, a
//! fixed-precision timestamp rendering, and `details` held in a
//! [`BTreeMap`] so key order never depends on insertion order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use armorclaw_crypto::{mac, SymmetricKey};
use armorclaw_types::{Actor, ComplianceInfo, Resource};

/// The all-zeros hash that roots an empty chain.
pub const CHAIN_ROOT: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One sealed entry in the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// UTC timestamp, truncated to millisecond precision at creation.
    pub timestamp: DateTime<Utc>,
    /// Event class tag (`key_created`, `auth_rejected`, …).
    pub event_type: String,
    /// Who acted.
    pub actor: Actor,
    /// What they did.
    pub action: String,
    /// What they did it to.
    pub resource: Resource,
    /// Structured context. Sorted map so canonical form is stable.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Compliance flags.
    pub compliance: ComplianceInfo,
    /// Hash of the predecessor entry, or [`CHAIN_ROOT`] at sequence 1.
    pub previous_hash: String,
    /// HMAC-SHA256 over the canonical serialization of all other fields.
    pub hash: String,
}

/// The fields covered by the hash, in canonical declaration order.
///
/// Serialized with `serde_json`, whose struct serialization follows
/// declaration order; combined with the `BTreeMap` details and the
/// fixed-precision timestamp string this yields a byte-stable form.
#[derive(Serialize)]
struct CanonicalFields<'a> {
    sequence: u64,
    timestamp: String,
    event_type: &'a str,
    actor: &'a Actor,
    action: &'a str,
    resource: &'a Resource,
    details: &'a BTreeMap<String, serde_json::Value>,
    compliance: &'a ComplianceInfo,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Serialize every field except `hash` into canonical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = CanonicalFields {
            sequence: self.sequence,
            timestamp: self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: &self.event_type,
            actor: &self.actor,
            action: &self.action,
            resource: &self.resource,
            details: &self.details,
            compliance: &self.compliance,
            previous_hash: &self.previous_hash,
        };
        serde_json::to_vec(&canonical).expect("canonical fields serialize")
    }

    /// Recompute the HMAC this entry should carry under `key`.
    pub fn compute_hash(&self, key: &SymmetricKey) -> String {
        mac::hmac_sha256_hex(key, &self.canonical_bytes())
    }
}

/// Truncate a timestamp to the millisecond precision the canonical form
/// renders, so stored and canonical values never diverge.
pub(crate) fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use armorclaw_types::Severity;

    fn entry() -> AuditEntry {
        let mut details = BTreeMap::new();
        details.insert("reason".to_string(), serde_json::json!("test"));
        details.insert("attempt".to_string(), serde_json::json!(1));
        AuditEntry {
            sequence: 1,
            timestamp: truncate_to_millis(Utc::now()),
            event_type: "key_created".to_string(),
            actor: Actor::system(),
            action: "store".to_string(),
            resource: Resource::new("credential", "cred-1"),
            details,
            compliance: ComplianceInfo::security(Severity::High),
            previous_hash: CHAIN_ROOT.to_string(),
            hash: String::new(),
        }
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let e = entry();
        assert_eq!(e.canonical_bytes(), e.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_exclude_hash() {
        let mut e = entry();
        let before = e.canonical_bytes();
        e.hash = "ffff".to_string();
        assert_eq!(before, e.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_cover_every_hashed_field() {
        let base = entry();
        let mut changed = entry();
        changed.action = "delete".to_string();
        assert_ne!(base.canonical_bytes(), changed.canonical_bytes());

        let mut changed = entry();
        changed.previous_hash = "ab".repeat(32);
        assert_ne!(base.canonical_bytes(), changed.canonical_bytes());
    }

    #[test]
    fn details_order_does_not_matter() {
        // BTreeMap sorts keys, so building in reverse insertion order
        // must produce identical canonical bytes.
        let a = entry();
        let mut b = entry();
        b.details = BTreeMap::new();
        b.details.insert("attempt".to_string(), serde_json::json!(1));
        b.details.insert("reason".to_string(), serde_json::json!("test"));
        // Align timestamps for the comparison.
        b.timestamp = a.timestamp;
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn hash_round_trips_through_json() {
        let key = SymmetricKey::from_bytes(&[9u8; 32]).unwrap();
        let mut e = entry();
        e.hash = e.compute_hash(&key);
        let json = serde_json::to_string(&e).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.compute_hash(&key), e.hash);
    }
}
