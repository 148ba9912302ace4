//! HKDF-SHA256 subkey derivation.
//!
//! Master keys loaded from config are never used raw: the keystore and the
//! audit chain each derive their working key with a distinct `info` label,
//! over a salt persisted alongside the data they protect.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{CryptoError, SymmetricKey, KEY_LEN};

/// Derive a 32-byte subkey from `master` material.
///
/// `salt` should be random and persisted next to whatever the subkey
/// protects; `info` is a domain-separation label (e.g. `b"keystore-v1"`).
pub fn derive_subkey(
    master: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    if master.is_empty() {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            got: 0,
        });
    }
    let hk = Hkdf::<Sha256>::new(Some(salt), master);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDecode(e.to_string()))?;
    SymmetricKey::from_bytes(&okm)
}
