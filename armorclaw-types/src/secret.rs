//! In-memory plaintext with scoped exposure and a guaranteed wipe.

use zeroize::Zeroize;

/// A plaintext secret held by the bridge.
///
/// The bytes are wiped when the value drops, and the only ways to read
/// them are scoped: [`reveal`](SecretString::reveal) borrows them for
/// the duration of a closure, and [`reveal_once`](SecretString::reveal_once)
/// consumes the value and wipes the bytes the moment the closure
/// returns. The secret injector uses the consuming form so a
/// credential cannot outlive its handoff to the worker. There is no
/// `Display`, no `Clone`, and no serde support, so a secret cannot
/// wander into logs or wire payloads by accident.
pub struct SecretString {
    bytes: Box<[u8]>,
}

impl SecretString {
    /// Take ownership of raw secret bytes. The vector is moved, not
    /// copied.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Take ownership of a secret string, consuming its buffer.
    pub fn from_string(s: String) -> Self {
        Self::new(s.into_bytes())
    }

    /// Borrow the secret bytes for the duration of the closure.
    pub fn reveal<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes)
    }

    /// Consume the secret: expose the bytes to the closure exactly
    /// once, then wipe them immediately rather than waiting for drop.
    /// This is the accessor for final uses, like sealing a credential
    /// or writing the injection frame.
    pub fn reveal_once<R>(mut self, f: impl FnOnce(&[u8]) -> R) -> R {
        let result = f(&self.bytes);
        self.bytes.zeroize();
        result
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the secret is empty. The keystore refuses to store an
    /// empty token.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}
