//! HMAC-SHA256 for the audit hash chain.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::SymmetricKey;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `data` and return the raw 32-byte tag.
pub fn hmac_sha256(key: &SymmetricKey, data: &[u8]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Compute HMAC-SHA256 over `data` and return the lowercase hex tag.
///
/// This is the representation the audit chain stores in `hash` and
/// `previous_hash` fields.
pub fn hmac_sha256_hex(key: &SymmetricKey, data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}
