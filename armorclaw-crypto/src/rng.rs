//! CSPRNG helpers for nonces, IDs, and challenge codes.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::CryptoError;

/// Draw `n` random bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut bytes = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::RngFailure(e.to_string()))?;
    Ok(bytes)
}

/// Generate an opaque record ID: `<prefix>-<16 hex chars>`.
pub fn generate_id(prefix: &str) -> Result<String, CryptoError> {
    let bytes = random_bytes(8)?;
    Ok(format!("{prefix}-{}", hex::encode(bytes)))
}

/// Generate an admin-claim challenge code: 16 uppercase hex characters.
pub fn challenge_code() -> Result<String, CryptoError> {
    let bytes = random_bytes(8)?;
    Ok(hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_len() {
        assert_eq!(random_bytes(24).unwrap().len(), 24);
        assert_eq!(random_bytes(0).unwrap().len(), 0);
    }

    #[test]
    fn ids_carry_prefix_and_differ() {
        let a = generate_id("cred").unwrap();
        let b = generate_id("cred").unwrap();
        assert!(a.starts_with("cred-"));
        assert_eq!(a.len(), "cred-".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn challenge_code_shape() {
        let code = challenge_code().unwrap();
        assert_eq!(code.len(), 16);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(code, code.to_uppercase());
    }
}
