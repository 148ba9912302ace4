#![deny(missing_docs)]
//! Encrypted-at-rest credential storage for the ArmorClaw bridge.
//!
//! Provider tokens live in a single schema-versioned JSON database file
//! (mode 0600). Each record holds only ciphertext and an AEAD nonce;
//! plaintext exists in memory alone, as [`SecretString`], during creation
//! and controlled retrieval.
//!
//! ## Design
//!
//! - The working key is never the configured master key itself: it is
//!   derived with HKDF-SHA256 over a random salt persisted in the store
//!   file, under the `armorclaw-keystore-v1` label.
//! - The record ID and provider tag are bound into the AEAD as associated
//!   data, so a ciphertext pasted onto another record fails to open.
//! - Every mutation and retrieval emits an audit event through the
//!   [`AuditSink`] the store was built with. Mutations are fail-closed:
//!   when the audit append fails, the mutation is aborted.
//! - Writes replace the database file atomically (write temp, rename).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use armorclaw_audit::{AuditEvent, AuditSink};
use armorclaw_crypto::{aead, kdf, rng, CryptoError, SymmetricKey};
use armorclaw_types::{
    Actor, BridgeError, ComplianceInfo, CredentialId, Provider, Resource, SecretString, Severity,
};

const SCHEMA_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const HKDF_INFO: &[u8] = b"armorclaw-keystore-v1";

/// Errors from the keystore.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Empty token, empty provider, or other malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No record with the given ID.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The database file could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Seal/open failure. Treated as tampering.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The audit append required by this operation failed.
    #[error("audit append failed: {0}")]
    AuditRequired(String),
}

impl From<KeystoreError> for BridgeError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::InvalidInput(m) => BridgeError::InvalidInput(m),
            KeystoreError::NotFound(id) => BridgeError::KeyNotFound(id),
            KeystoreError::Storage(m) => BridgeError::KeystoreUnavailable(m),
            KeystoreError::Crypto(e) => BridgeError::Crypto(e.to_string()),
            KeystoreError::AuditRequired(m) => BridgeError::AuditAppendFailed(m),
        }
    }
}

/// A persisted credential record. Ciphertext is the only representation
/// of the token at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialRecord {
    id: String,
    provider: Provider,
    display_name: String,
    ciphertext: String,
    nonce: String,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Metadata view of a record: everything except the secret material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMetadata {
    /// Stable opaque record ID.
    pub id: CredentialId,
    /// Provider tag.
    pub provider: Provider,
    /// Human-readable name.
    pub display_name: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Expiry instant, when set.
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

impl CredentialMetadata {
    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            id: CredentialId::new(record.id.clone()),
            provider: record.provider,
            display_name: record.display_name.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            tags: record.tags.clone(),
        }
    }
}

/// A retrieved credential. The token wipes itself on drop.
#[derive(Debug)]
pub struct PlaintextCredential {
    /// Provider tag.
    pub provider: Provider,
    /// Human-readable name.
    pub display_name: String,
    /// The decrypted token.
    pub token: SecretString,
}

/// On-disk shape of the database file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    salt: String,
    records: BTreeMap<String, CredentialRecord>,
}

struct StoreState {
    records: BTreeMap<String, CredentialRecord>,
    salt: Vec<u8>,
}

/// The credential keystore.
pub struct Keystore {
    path: PathBuf,
    key: SymmetricKey,
    state: tokio::sync::RwLock<StoreState>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Keystore {
    /// Open (or create) the database at `path`, deriving the working key
    /// from `master` material and the persisted salt.
    ///
    /// # Errors
    ///
    /// [`KeystoreError::Storage`] when the file exists but cannot be read
    /// or parsed; [`KeystoreError::Crypto`] when key derivation fails.
    pub async fn open(path: impl AsRef<Path>, master: &[u8]) -> Result<Self, KeystoreError> {
        let path = path.as_ref().to_path_buf();
        let (salt, records) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let file: StoreFile = serde_json::from_str(&contents)
                    .map_err(|e| KeystoreError::Storage(format!("parse: {e}")))?;
                if file.schema_version != SCHEMA_VERSION {
                    return Err(KeystoreError::Storage(format!(
                        "unsupported schema version {}",
                        file.schema_version
                    )));
                }
                let salt = hex::decode(&file.salt)
                    .map_err(|e| KeystoreError::Storage(format!("salt: {e}")))?;
                debug!(records = file.records.len(), "loaded keystore");
                (salt, file.records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let salt = rng::random_bytes(SALT_LEN)?;
                (salt, BTreeMap::new())
            }
            Err(e) => return Err(KeystoreError::Storage(e.to_string())),
        };
        let key = kdf::derive_subkey(master, &salt, HKDF_INFO)?;
        Ok(Self {
            path,
            key,
            state: tokio::sync::RwLock::new(StoreState { records, salt }),
            audit: None,
        })
    }

    /// Attach the audit sink mutations and retrievals report to.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Seal and persist a new credential. Returns its generated ID.
    ///
    /// Emits `key_created` (severity high) before the record is written;
    /// if that audit append fails the store is not modified.
    pub async fn store(
        &self,
        provider: Provider,
        token: SecretString,
        display_name: &str,
        tags: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialId, KeystoreError> {
        if token.is_empty() {
            return Err(KeystoreError::InvalidInput("empty token".to_string()));
        }
        if display_name.is_empty() {
            return Err(KeystoreError::InvalidInput(
                "empty display name".to_string(),
            ));
        }

        let id = rng::generate_id("cred")?;
        self.audit_required(
            AuditEvent::new(
                "key_created",
                Actor::system(),
                "store",
                Resource::new("credential", &id),
                ComplianceInfo::security(Severity::High),
            )
            .with_detail("provider", json!(provider.as_str()))
            .with_detail("display_name", json!(display_name)),
        )
        .await?;

        let aad = record_aad(&id, provider);
        let (nonce, ciphertext) =
            token.reveal_once(|bytes| aead::seal(&self.key, bytes, &aad))?;

        let record = CredentialRecord {
            id: id.clone(),
            provider,
            display_name: display_name.to_string(),
            ciphertext: BASE64.encode(&ciphertext),
            nonce: hex::encode(nonce),
            created_at: Utc::now(),
            expires_at,
            tags,
        };

        let mut state = self.state.write().await;
        state.records.insert(id.clone(), record);
        self.persist(&state).await?;
        Ok(CredentialId::new(id))
    }

    /// Open the ciphertext for `id` and hand back the plaintext token.
    ///
    /// Emits `key_access` (severity medium on success, high on failure).
    pub async fn retrieve(&self, id: &CredentialId) -> Result<PlaintextCredential, KeystoreError> {
        let result = self.retrieve_inner(id).await;
        let severity = if result.is_ok() {
            Severity::Medium
        } else {
            Severity::High
        };
        let event = AuditEvent::new(
            "key_access",
            Actor::system(),
            "retrieve",
            Resource::new("credential", id.as_str()),
            ComplianceInfo::access(severity),
        )
        .with_detail("success", json!(result.is_ok()));
        if let Some(sink) = &self.audit {
            if let Err(e) = sink.record(event).await {
                warn!(error = %e, "key_access audit append failed");
            }
        }
        result
    }

    async fn retrieve_inner(
        &self,
        id: &CredentialId,
    ) -> Result<PlaintextCredential, KeystoreError> {
        let state = self.state.read().await;
        let record = state
            .records
            .get(id.as_str())
            .ok_or_else(|| KeystoreError::NotFound(id.to_string()))?;
        let ciphertext = BASE64
            .decode(&record.ciphertext)
            .map_err(|e| KeystoreError::Storage(format!("ciphertext: {e}")))?;
        let nonce = hex::decode(&record.nonce)
            .map_err(|e| KeystoreError::Storage(format!("nonce: {e}")))?;
        let aad = record_aad(&record.id, record.provider);
        let plaintext = aead::open(&self.key, &nonce, &ciphertext, &aad)?;
        Ok(PlaintextCredential {
            provider: record.provider,
            display_name: record.display_name.clone(),
            token: SecretString::new(plaintext.to_vec()),
        })
    }

    /// Metadata for all records, optionally filtered by provider.
    /// Never returns plaintext.
    pub async fn list(&self, provider: Option<Provider>) -> Vec<CredentialMetadata> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|r| provider.is_none_or(|p| r.provider == p))
            .map(CredentialMetadata::from_record)
            .collect()
    }

    /// Re-seal `id` under a fresh nonce with a new token.
    ///
    /// Emits `key_updated` (severity high), fail-closed like [`store`](Self::store).
    pub async fn rotate(
        &self,
        id: &CredentialId,
        new_token: SecretString,
    ) -> Result<(), KeystoreError> {
        if new_token.is_empty() {
            return Err(KeystoreError::InvalidInput("empty token".to_string()));
        }
        self.audit_required(
            AuditEvent::new(
                "key_updated",
                Actor::system(),
                "rotate",
                Resource::new("credential", id.as_str()),
                ComplianceInfo::security(Severity::High),
            ),
        )
        .await?;

        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(id.as_str())
            .ok_or_else(|| KeystoreError::NotFound(id.to_string()))?;
        let aad = record_aad(&record.id, record.provider);
        let (nonce, ciphertext) =
            new_token.reveal_once(|bytes| aead::seal(&self.key, bytes, &aad))?;
        record.ciphertext = BASE64.encode(&ciphertext);
        record.nonce = hex::encode(nonce);
        self.persist(&state).await?;
        Ok(())
    }

    /// Remove `id` from the store.
    ///
    /// Emits `key_deleted` (severity high), fail-closed.
    pub async fn delete(&self, id: &CredentialId) -> Result<(), KeystoreError> {
        self.audit_required(
            AuditEvent::new(
                "key_deleted",
                Actor::system(),
                "delete",
                Resource::new("credential", id.as_str()),
                ComplianceInfo::security(Severity::High),
            ),
        )
        .await?;

        let mut state = self.state.write().await;
        if state.records.remove(id.as_str()).is_none() {
            return Err(KeystoreError::NotFound(id.to_string()));
        }
        self.persist(&state).await?;
        Ok(())
    }

    /// True iff `expires_at` is set and in the past.
    pub async fn is_expired(&self, id: &CredentialId) -> Result<bool, KeystoreError> {
        let state = self.state.read().await;
        let record = state
            .records
            .get(id.as_str())
            .ok_or_else(|| KeystoreError::NotFound(id.to_string()))?;
        Ok(record.expires_at.is_some_and(|exp| exp < Utc::now()))
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// True when no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn audit_required(&self, event: AuditEvent) -> Result<(), KeystoreError> {
        if let Some(sink) = &self.audit {
            sink.record(event)
                .await
                .map_err(|e| KeystoreError::AuditRequired(e.to_string()))?;
        }
        Ok(())
    }

    /// Atomically replace the database file. Called under the write lock.
    async fn persist(&self, state: &StoreState) -> Result<(), KeystoreError> {
        let file = StoreFile {
            schema_version: SCHEMA_VERSION,
            salt: hex::encode(&state.salt),
            records: state.records.clone(),
        };
        let contents = serde_json::to_vec_pretty(&file)
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut out = options
            .open(&tmp)
            .await
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        out.write_all(&contents)
            .await
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        drop(out);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Associated data binding a ciphertext to its record identity.
fn record_aad(id: &str, provider: Provider) -> Vec<u8> {
    format!("{id}:{}", provider.as_str()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use armorclaw_audit::AuditError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct RecordingSink {
        events: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
            if self.fail {
                return Err(AuditError::Append("journal offline".to_string()));
            }
            self.events.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    async fn open_store(dir: &std::path::Path) -> Keystore {
        Keystore::open(dir.join("keystore.json"), b"master material")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let id = store
            .store(
                Provider::Openai,
                SecretString::from_string("sk-LITERAL-001".to_string()),
                "ci key",
                vec!["ci".to_string()],
                None,
            )
            .await
            .unwrap();
        let cred = store.retrieve(&id).await.unwrap();
        assert_eq!(cred.provider, Provider::Openai);
        assert_eq!(cred.display_name, "ci key");
        cred.token.reveal(|b| assert_eq!(b, b"sk-LITERAL-001"));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let err = store
            .store(Provider::Openai, SecretString::new(vec![]), "k", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn retrieve_after_delete_is_not_found() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let id = store
            .store(
                Provider::Anthropic,
                SecretString::from_string("tok".to_string()),
                "k",
                vec![],
                None,
            )
            .await
            .unwrap();
        store.delete(&id).await.unwrap();
        assert!(matches!(
            store.retrieve(&id).await.unwrap_err(),
            KeystoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_never_exposes_plaintext() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .store(
                Provider::Openai,
                SecretString::from_string("sk-secret".to_string()),
                "a",
                vec![],
                None,
            )
            .await
            .unwrap();
        store
            .store(
                Provider::Groq,
                SecretString::from_string("gq-secret".to_string()),
                "b",
                vec![],
                None,
            )
            .await
            .unwrap();

        let all = store.list(None).await;
        assert_eq!(all.len(), 2);
        let rendered = serde_json::to_string(&all).unwrap();
        assert!(!rendered.contains("secret"));

        let openai_only = store.list(Some(Provider::Openai)).await;
        assert_eq!(openai_only.len(), 1);
        assert_eq!(openai_only[0].display_name, "a");
    }

    #[tokio::test]
    async fn rotate_changes_token_and_nonce() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let id = store
            .store(
                Provider::Mistral,
                SecretString::from_string("old".to_string()),
                "k",
                vec![],
                None,
            )
            .await
            .unwrap();
        store
            .rotate(&id, SecretString::from_string("new".to_string()))
            .await
            .unwrap();
        let cred = store.retrieve(&id).await.unwrap();
        cred.token.reveal(|b| assert_eq!(b, b"new"));
    }

    #[tokio::test]
    async fn records_survive_reopen_with_same_master() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let id = {
            let store = Keystore::open(&path, b"master").await.unwrap();
            store
                .store(
                    Provider::Openai,
                    SecretString::from_string("sk-persist".to_string()),
                    "k",
                    vec![],
                    None,
                )
                .await
                .unwrap()
        };
        let store = Keystore::open(&path, b"master").await.unwrap();
        let cred = store.retrieve(&id).await.unwrap();
        cred.token.reveal(|b| assert_eq!(b, b"sk-persist"));
    }

    #[tokio::test]
    async fn wrong_master_key_fails_to_open_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let id = {
            let store = Keystore::open(&path, b"master").await.unwrap();
            store
                .store(
                    Provider::Openai,
                    SecretString::from_string("sk-x".to_string()),
                    "k",
                    vec![],
                    None,
                )
                .await
                .unwrap()
        };
        let store = Keystore::open(&path, b"different").await.unwrap();
        assert!(matches!(
            store.retrieve(&id).await.unwrap_err(),
            KeystoreError::Crypto(_)
        ));
    }

    #[tokio::test]
    async fn plaintext_never_reaches_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let store = Keystore::open(&path, b"master").await.unwrap();
        store
            .store(
                Provider::Openai,
                SecretString::from_string("sk-LITERAL-001".to_string()),
                "k",
                vec![],
                None,
            )
            .await
            .unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("sk-LITERAL-001"));
    }

    #[tokio::test]
    async fn expiry_is_reported() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let expired = store
            .store(
                Provider::Openai,
                SecretString::from_string("a".to_string()),
                "old",
                vec![],
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        let fresh = store
            .store(
                Provider::Openai,
                SecretString::from_string("b".to_string()),
                "new",
                vec![],
                Some(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert!(store.is_expired(&expired).await.unwrap());
        assert!(!store.is_expired(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn mutations_emit_audit_events() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new(false);
        let store = open_store(dir.path()).await.with_audit_sink(sink.clone());
        let id = store
            .store(
                Provider::Openai,
                SecretString::from_string("sk".to_string()),
                "k",
                vec![],
                None,
            )
            .await
            .unwrap();
        store.retrieve(&id).await.unwrap();
        store
            .rotate(&id, SecretString::from_string("sk2".to_string()))
            .await
            .unwrap();
        store.delete(&id).await.unwrap();
        let events = sink.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["key_created", "key_access", "key_updated", "key_deleted"]
        );
    }

    #[tokio::test]
    async fn failed_audit_aborts_store() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new(true);
        let store = open_store(dir.path()).await.with_audit_sink(sink);
        let err = store
            .store(
                Provider::Openai,
                SecretString::from_string("sk".to_string()),
                "k",
                vec![],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoreError::AuditRequired(_)));
        assert!(store.is_empty().await);
    }
}
