//! Chain export: newline-delimited JSON and CSV.
//!
//! The JSONL form opens with one integrity-header line and can be parsed
//! back with [`parse_export`] for re-verification. CSV is a one-way
//! tabular rendering for spreadsheets and SIEM ingestion.

use serde::{Deserialize, Serialize};

use crate::entry::{AuditEntry, CHAIN_ROOT};
use crate::AuditError;

/// Supported export renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Integrity header line followed by one JSON entry per line.
    Jsonl,
    /// Tabular rendering with a header row.
    Csv,
}

/// The integrity header that opens a JSONL export.
#[derive(Debug, Serialize, Deserialize)]
struct ExportHeader {
    format: String,
    version: u32,
    entries: usize,
    tail_hash: String,
}

const EXPORT_FORMAT_TAG: &str = "armorclaw-audit-export";

pub(crate) fn render(format: ExportFormat, entries: &[AuditEntry]) -> Vec<u8> {
    match format {
        ExportFormat::Jsonl => render_jsonl(entries),
        ExportFormat::Csv => render_csv(entries),
    }
}

fn render_jsonl(entries: &[AuditEntry]) -> Vec<u8> {
    let header = ExportHeader {
        format: EXPORT_FORMAT_TAG.to_string(),
        version: 1,
        entries: entries.len(),
        tail_hash: entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| CHAIN_ROOT.to_string()),
    };
    let mut out = Vec::new();
    out.extend_from_slice(
        serde_json::to_string(&header)
            .expect("header serializes")
            .as_bytes(),
    );
    out.push(b'\n');
    for entry in entries {
        out.extend_from_slice(
            serde_json::to_string(entry)
                .expect("entry serializes")
                .as_bytes(),
        );
        out.push(b'\n');
    }
    out
}

fn render_csv(entries: &[AuditEntry]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(
        "sequence,timestamp,event_type,actor_type,actor_id,action,\
         resource_type,resource_id,severity,previous_hash,hash\n",
    );
    for e in entries {
        let fields = [
            e.sequence.to_string(),
            e.timestamp.to_rfc3339(),
            e.event_type.clone(),
            e.actor.actor_type.as_str().to_string(),
            e.actor.id.clone(),
            e.action.clone(),
            e.resource.resource_type.clone(),
            e.resource.id.clone(),
            e.compliance.severity.as_str().to_string(),
            e.previous_hash.clone(),
            e.hash.clone(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Parse a JSONL export back into entries.
///
/// The header is validated against the entry count; the caller re-verifies
/// the chain with [`crate::verify_entries`] and its own key.
pub fn parse_export(bytes: &[u8]) -> Result<Vec<AuditEntry>, AuditError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AuditError::Export(format!("not utf-8: {e}")))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines
        .next()
        .ok_or_else(|| AuditError::Export("empty export".to_string()))?;
    let header: ExportHeader = serde_json::from_str(header_line)
        .map_err(|e| AuditError::Export(format!("bad header: {e}")))?;
    if header.format != EXPORT_FORMAT_TAG {
        return Err(AuditError::Export(format!(
            "unknown format tag: {}",
            header.format
        )));
    }
    let mut entries = Vec::with_capacity(header.entries);
    for line in lines {
        let entry: AuditEntry = serde_json::from_str(line)
            .map_err(|e| AuditError::Export(format!("bad entry: {e}")))?;
        entries.push(entry);
    }
    if entries.len() != header.entries {
        return Err(AuditError::Export(format!(
            "header claims {} entries, found {}",
            header.entries,
            entries.len()
        )));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{verify_entries, AuditEvent, AuditLog};
    use armorclaw_crypto::SymmetricKey;
    use armorclaw_types::{Actor, ComplianceInfo, Resource, Severity};
    use tempfile::tempdir;

    fn test_key() -> SymmetricKey {
        SymmetricKey::from_bytes(&[42u8; 32]).unwrap()
    }

    async fn sample_log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl"), test_key())
            .await
            .unwrap();
        for t in ["a", "b", "c"] {
            log.log_entry(AuditEvent::new(
                t,
                Actor::user("@alice:example.com"),
                "act",
                Resource::new("credential", "cred-1"),
                ComplianceInfo::security(Severity::Low),
            ))
            .await
            .unwrap();
        }
        (dir, log)
    }

    #[tokio::test]
    async fn jsonl_export_reimports_and_still_verifies() {
        let (_dir, log) = sample_log().await;
        let bytes = log.export(ExportFormat::Jsonl).await;
        let entries = parse_export(&bytes).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(verify_entries(&test_key(), &entries).valid);
    }

    #[tokio::test]
    async fn tampered_reimport_fails_verification() {
        let (_dir, log) = sample_log().await;
        let bytes = log.export(ExportFormat::Jsonl).await;
        let mut entries = parse_export(&bytes).unwrap();
        entries[1].action = "evil".to_string();
        assert!(!verify_entries(&test_key(), &entries).valid);
    }

    #[tokio::test]
    async fn csv_has_header_and_one_row_per_entry() {
        let (_dir, log) = sample_log().await;
        let bytes = log.export(ExportFormat::Csv).await;
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("sequence,timestamp,event_type"));
        assert!(lines[1].starts_with("1,"));
    }

    #[test]
    fn csv_escape_quotes_commas() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn parse_export_rejects_garbage() {
        assert!(parse_export(b"").is_err());
        assert!(parse_export(b"{\"format\":\"something-else\",\"version\":1,\"entries\":0,\"tail_hash\":\"x\"}\n").is_err());
    }

    #[tokio::test]
    async fn empty_chain_exports_zero_root_tail() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl"), test_key())
            .await
            .unwrap();
        let bytes = log.export(ExportFormat::Jsonl).await;
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.lines().next().unwrap().contains(crate::CHAIN_ROOT));
        assert_eq!(parse_export(text.as_bytes()).unwrap().len(), 0);
    }
}
