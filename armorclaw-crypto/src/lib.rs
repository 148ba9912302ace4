#![deny(missing_docs)]
//! Crypto primitives for the ArmorClaw bridge.
//!
//! Four small surfaces, used by the keystore, the audit chain, and the
//! lifecycle admin claim:
//!
//! - [`aead`] — XChaCha20-Poly1305 seal/open with 24-byte random nonces
//! - [`kdf`] — HKDF-SHA256 subkey derivation from master-key material
//! - [`mac`] — HMAC-SHA256 for the audit hash chain
//! - [`rng`] — CSPRNG helpers for nonces, IDs, and challenge codes
//!
//! ## Design
//!
//! Key material always travels as [`SymmetricKey`] (zeroed on drop) and
//! opened plaintext comes back as `Zeroizing<Vec<u8>>` so every buffer is
//! wiped regardless of the caller's exit path. Tampered ciphertext, short
//! keys, and RNG failure all surface as [`CryptoError`].

use thiserror::Error;
use zeroize::Zeroizing;

pub mod aead;
pub mod kdf;
pub mod mac;
pub mod rng;

pub use aead::{open, seal, NONCE_LEN};
pub use kdf::derive_subkey;
pub use mac::hmac_sha256_hex;
pub use rng::{challenge_code, generate_id, random_bytes};

/// Length of a symmetric key in bytes.
pub const KEY_LEN: usize = 32;

/// Errors from the crypto layer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material of the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength {
        /// Required key length.
        expected: usize,
        /// Length actually provided.
        got: usize,
    },

    /// Nonce of the wrong length.
    #[error("invalid nonce length: expected {expected} bytes, got {got}")]
    InvalidNonceLength {
        /// Required nonce length.
        expected: usize,
        /// Length actually provided.
        got: usize,
    },

    /// AEAD open failed. The ciphertext or its tag has been altered.
    #[error("ciphertext rejected: authentication tag mismatch")]
    TagMismatch,

    /// The system CSPRNG failed to produce bytes.
    #[error("rng failure: {0}")]
    RngFailure(String),

    /// Key material that is not valid hex.
    #[error("key decode failed: {0}")]
    KeyDecode(String),
}

impl From<CryptoError> for armorclaw_types::BridgeError {
    fn from(err: CryptoError) -> Self {
        armorclaw_types::BridgeError::Crypto(err.to_string())
    }
}

/// A 32-byte symmetric key, zeroed on drop.
pub struct SymmetricKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl SymmetricKey {
    /// Wrap raw key bytes. Fails unless exactly [`KEY_LEN`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self {
            bytes: Zeroizing::new(key),
        })
    }

    /// Decode a hex-encoded key, as stored in master-key files.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| CryptoError::KeyDecode(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let bytes = rng::random_bytes(KEY_LEN)?;
        Self::from_bytes(&bytes)
    }

    /// Borrow the raw key bytes.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rejects_short_material() {
        let err = SymmetricKey::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength { expected: 32, got: 16 }
        ));
    }

    #[test]
    fn key_from_hex_round_trip() {
        let key = SymmetricKey::generate().unwrap();
        let hex_str = hex::encode(key.as_bytes());
        let back = SymmetricKey::from_hex(&hex_str).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn key_from_hex_rejects_garbage() {
        assert!(matches!(
            SymmetricKey::from_hex("not hex").unwrap_err(),
            CryptoError::KeyDecode(_)
        ));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SymmetricKey::generate().unwrap();
        assert_eq!(format!("{key:?}"), "SymmetricKey([REDACTED])");
    }
}
