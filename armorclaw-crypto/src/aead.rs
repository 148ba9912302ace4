//! AEAD seal/open — XChaCha20-Poly1305.
//!
//! 24-byte nonces are drawn fresh from the CSPRNG per seal, so no nonce
//! counter needs to survive a restart.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::{rng, CryptoError, SymmetricKey};

/// XChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_LEN: usize = 24;

/// Seal `plaintext` under `key`, binding `aad` into the tag.
///
/// Returns the freshly generated nonce and the ciphertext (tag appended).
pub fn seal(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce_bytes = rng::random_bytes(NONCE_LEN)?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::TagMismatch)?;
    Ok((nonce, ciphertext))
}

/// Open `ciphertext` sealed by [`seal`].
///
/// The returned plaintext is zeroed when dropped. Any alteration of the
/// ciphertext, nonce, or `aad` fails with [`CryptoError::TagMismatch`].
pub fn open(
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_LEN,
            got: nonce.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::TagMismatch)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = SymmetricKey::generate().unwrap();
        let (nonce, ct) = seal(&key, b"sk-LITERAL-001", b"credential").unwrap();
        let pt = open(&key, &nonce, &ct, b"credential").unwrap();
        assert_eq!(&pt[..], b"sk-LITERAL-001");
    }

    #[test]
    fn flipped_byte_is_rejected() {
        let key = SymmetricKey::generate().unwrap();
        let (nonce, mut ct) = seal(&key, b"token", b"").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(
            open(&key, &nonce, &ct, b"").unwrap_err(),
            CryptoError::TagMismatch
        ));
    }

    #[test]
    fn wrong_aad_is_rejected() {
        let key = SymmetricKey::generate().unwrap();
        let (nonce, ct) = seal(&key, b"token", b"aad-a").unwrap();
        assert!(open(&key, &nonce, &ct, b"aad-b").is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = SymmetricKey::generate().unwrap();
        let other = SymmetricKey::generate().unwrap();
        let (nonce, ct) = seal(&key, b"token", b"").unwrap();
        assert!(open(&other, &nonce, &ct, b"").is_err());
    }

    #[test]
    fn short_nonce_is_rejected() {
        let key = SymmetricKey::generate().unwrap();
        let (_, ct) = seal(&key, b"token", b"").unwrap();
        assert!(matches!(
            open(&key, &[0u8; 12], &ct, b"").unwrap_err(),
            CryptoError::InvalidNonceLength { expected: 24, got: 12 }
        ));
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        let key = SymmetricKey::generate().unwrap();
        let (n1, _) = seal(&key, b"x", b"").unwrap();
        let (n2, _) = seal(&key, b"x", b"").unwrap();
        assert_ne!(n1, n2);
    }
}
