#![deny(missing_docs)]
//! Tamper-evident audit log for the ArmorClaw bridge.
//!
//! Every security-relevant event in the bridge lands here as a
//! hash-chained [`AuditEntry`]: each entry carries an HMAC-SHA256 over its
//! canonical serialization and the hash of its predecessor, so any
//! in-place edit or deletion breaks verification from that point on.
//!
//! ## Design
//!
//! - Appends are synchronous and fail-closed: if the journal write fails,
//!   the entry is not considered logged and the caller gets
//!   [`AuditError::Append`]. Audit-required operations abort on that.
//! - The HMAC key comes from configured key material (never derived from
//!   a constant), stretched through HKDF by the caller.
//! - Canonical serialization is byte-stable across processes; see
//!   [`entry`] for the exact rules. Any non-determinism there would
//!   silently break [`AuditLog::verify`].
//! - Components emit events through the [`AuditSink`] trait so nothing
//!   holds a back-reference to the log itself.
//! - [`writer::BufferedAuditWriter`] adds the optional bounded-queue
//!   write mode; the default is synchronous.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use armorclaw_crypto::SymmetricKey;
use armorclaw_types::{Actor, ComplianceInfo, Resource, Severity};

pub mod entry;
pub mod export;
pub mod writer;

pub use entry::{AuditEntry, CHAIN_ROOT};
pub use export::{parse_export, ExportFormat};

/// Errors from the audit subsystem.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AuditError {
    /// The journal could not be opened or parsed at startup.
    #[error("audit journal unavailable: {0}")]
    Unavailable(String),

    /// Appending an entry failed; the entry is NOT logged.
    #[error("audit append failed: {0}")]
    Append(String),

    /// An export or import payload was malformed.
    #[error("audit export malformed: {0}")]
    Export(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<AuditError> for armorclaw_types::BridgeError {
    fn from(err: AuditError) -> Self {
        armorclaw_types::BridgeError::AuditAppendFailed(err.to_string())
    }
}

/// An event to be sealed into the chain.
///
/// This is the unsealed input; [`AuditLog::log_entry`] assigns sequence,
/// timestamp, and hashes.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event class tag (`key_created`, `auth_rejected`, …).
    pub event_type: String,
    /// Who acted.
    pub actor: Actor,
    /// What they did.
    pub action: String,
    /// What they did it to.
    pub resource: Resource,
    /// Structured context.
    pub details: BTreeMap<String, Value>,
    /// Compliance flags.
    pub compliance: ComplianceInfo,
}

impl AuditEvent {
    /// Build an event with empty details.
    pub fn new(
        event_type: impl Into<String>,
        actor: Actor,
        action: impl Into<String>,
        resource: Resource,
        compliance: ComplianceInfo,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor,
            action: action.into(),
            resource,
            details: BTreeMap::new(),
            compliance,
        }
    }

    /// Attach a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Where components send their security events.
///
/// [`AuditLog`] implements this; tests use in-memory stubs.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Seal and persist one event.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Result of a chain verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// True iff every hash and every linkage checks out.
    pub valid: bool,
    /// Sequences whose hash or linkage failed, in order.
    pub corrupt_sequences: Vec<u64>,
    /// The first corrupt sequence, when any.
    pub tampered_at: Option<u64>,
}

/// Query filter for [`AuditLog::get_entries`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Match this event type exactly.
    pub event_type: Option<String>,
    /// Match this actor ID exactly.
    pub actor_id: Option<String>,
    /// Match this resource ID exactly.
    pub resource_id: Option<String>,
    /// Entries at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Entries at or before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Entries at or above this severity.
    pub min_severity: Option<Severity>,
    /// Only entries flagged as PHI-involved.
    pub phi_only: bool,
    /// Cap on returned entries (default 1000).
    pub limit: Option<usize>,
}

const DEFAULT_QUERY_LIMIT: usize = 1000;

struct ChainState {
    entries: Vec<AuditEntry>,
}

/// The hash-chained, append-only audit journal.
///
/// Entries live in memory for querying and in a newline-delimited journal
/// file (mode 0600) for persistence. The write lock serializes sequence
/// allocation and the journal append.
pub struct AuditLog {
    path: PathBuf,
    key: SymmetricKey,
    state: tokio::sync::RwLock<ChainState>,
}

impl AuditLog {
    /// Open the journal at `path`, loading any existing chain.
    ///
    /// # Errors
    ///
    /// [`AuditError::Unavailable`] when the file exists but cannot be
    /// read or parsed.
    pub async fn open(path: impl AsRef<Path>, key: SymmetricKey) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let mut entries = Vec::new();
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: AuditEntry = serde_json::from_str(line).map_err(|e| {
                        AuditError::Unavailable(format!("journal line {}: {e}", line_no + 1))
                    })?;
                    entries.push(entry);
                }
                debug!(count = entries.len(), "loaded audit chain");
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AuditError::Unavailable(e.to_string())),
        };
        Ok(Self {
            path,
            key,
            state: tokio::sync::RwLock::new(ChainState { entries }),
        })
    }

    /// Seal `event` as the next entry and persist it.
    ///
    /// The sequence is allocated and the journal written under the write
    /// lock, so readers always observe a prefix-consistent chain.
    pub async fn log_entry(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        let mut state = self.state.write().await;
        let (sequence, previous_hash) = match state.entries.last() {
            Some(tail) => (tail.sequence + 1, tail.hash.clone()),
            None => (1, CHAIN_ROOT.to_string()),
        };
        let mut entry = AuditEntry {
            sequence,
            timestamp: entry::truncate_to_millis(Utc::now()),
            event_type: event.event_type,
            actor: event.actor,
            action: event.action,
            resource: event.resource,
            details: event.details,
            compliance: event.compliance,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash(&self.key);

        let line = serde_json::to_string(&entry)
            .map_err(|e| AuditError::Append(e.to_string()))?;
        self.append_line(&line).await?;
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn append_line(&self, line: &str) -> Result<(), AuditError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&self.path)
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        Ok(())
    }

    /// Recompute every hash and linkage, reporting every break.
    pub async fn verify(&self) -> VerifyReport {
        let state = self.state.read().await;
        verify_entries(&self.key, &state.entries)
    }

    /// Query entries matching `filter`. Results are a defensive copy.
    pub async fn get_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let state = self.state.read().await;
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        state
            .entries
            .iter()
            .filter(|e| filter_matches(filter, e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of entries currently in the chain.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// True when the chain is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The hash of the chain tail, or [`CHAIN_ROOT`] when empty.
    pub async fn tail_hash(&self) -> String {
        let state = self.state.read().await;
        state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| CHAIN_ROOT.to_string())
    }

    /// Dump the chain in the given export format.
    pub async fn export(&self, format: ExportFormat) -> Vec<u8> {
        let state = self.state.read().await;
        export::render(format, &state.entries)
    }

    /// Drop entries older than `retention` and restart the chain from a
    /// compaction marker. This is the only permitted way to lose history.
    ///
    /// The marker becomes the new chain root; it records the pre-compaction
    /// tail hash and the number of dropped entries. Retained entries are
    /// re-sealed behind the marker so the chain verifies end to end.
    /// Returns the number of dropped entries (0 means nothing changed).
    pub async fn retention_compact(&self, retention: Duration) -> Result<usize, AuditError> {
        let cutoff = Utc::now() - retention;
        let mut state = self.state.write().await;

        let dropped: usize = state
            .entries
            .iter()
            .take_while(|e| e.timestamp < cutoff)
            .count();
        if dropped == 0 {
            return Ok(0);
        }

        let old_tail_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| CHAIN_ROOT.to_string());
        let old_last_sequence = state.entries.last().map(|e| e.sequence).unwrap_or(0);
        let retained: Vec<AuditEntry> = state.entries.split_off(dropped);

        let mut details = BTreeMap::new();
        details.insert("old_tail_hash".to_string(), Value::String(old_tail_hash));
        details.insert("dropped".to_string(), Value::from(dropped as u64));
        details.insert(
            "old_last_sequence".to_string(),
            Value::from(old_last_sequence),
        );

        let mut marker = AuditEntry {
            sequence: 1,
            timestamp: entry::truncate_to_millis(Utc::now()),
            event_type: "retention_compaction".to_string(),
            actor: Actor::system(),
            action: "compact".to_string(),
            resource: Resource::new("audit_chain", "audit"),
            details,
            compliance: ComplianceInfo {
                category: "retention".to_string(),
                severity: Severity::High,
                phi_involved: false,
                audit_required: true,
            },
            previous_hash: CHAIN_ROOT.to_string(),
            hash: String::new(),
        };
        marker.hash = marker.compute_hash(&self.key);

        let mut rebuilt = Vec::with_capacity(retained.len() + 1);
        rebuilt.push(marker);
        for mut entry in retained {
            let tail = rebuilt.last().expect("marker present");
            entry.sequence = tail.sequence + 1;
            entry.previous_hash = tail.hash.clone();
            entry.hash = entry.compute_hash(&self.key);
            rebuilt.push(entry);
        }

        self.rewrite_journal(&rebuilt).await?;
        warn!(dropped, retained = rebuilt.len() - 1, "audit chain compacted");
        state.entries = rebuilt;
        Ok(dropped)
    }

    /// Atomically replace the journal file with the given chain.
    async fn rewrite_journal(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = Vec::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| AuditError::Append(e.to_string()))?;
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        file.write_all(&buf)
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AuditError::Append(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.log_entry(event).await.map(|_| ())
    }
}

/// Verify a chain slice independently of any [`AuditLog`] instance.
///
/// Used by the import path and by anything that wants to check an
/// exported chain against the same key.
pub fn verify_entries(key: &SymmetricKey, entries: &[AuditEntry]) -> VerifyReport {
    let mut corrupt = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let expected_previous = if i == 0 {
            CHAIN_ROOT
        } else {
            entries[i - 1].hash.as_str()
        };
        let hash_ok = entry.compute_hash(key) == entry.hash;
        let link_ok = entry.previous_hash == expected_previous;
        if !hash_ok || !link_ok {
            corrupt.push(entry.sequence);
        }
    }
    VerifyReport {
        valid: corrupt.is_empty(),
        tampered_at: corrupt.first().copied(),
        corrupt_sequences: corrupt,
    }
}

fn filter_matches(filter: &AuditFilter, entry: &AuditEntry) -> bool {
    if let Some(ref event_type) = filter.event_type {
        if entry.event_type != *event_type {
            return false;
        }
    }
    if let Some(ref actor_id) = filter.actor_id {
        if entry.actor.id != *actor_id {
            return false;
        }
    }
    if let Some(ref resource_id) = filter.resource_id {
        if entry.resource.id != *resource_id {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if entry.timestamp < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if entry.timestamp > to {
            return false;
        }
    }
    if let Some(min) = filter.min_severity {
        if entry.compliance.severity < min {
            return false;
        }
    }
    if filter.phi_only && !entry.compliance.phi_involved {
        return false;
    }
    true
}
