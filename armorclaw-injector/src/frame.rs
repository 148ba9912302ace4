//! The secret handoff frame: 4-byte big-endian length, then a JSON
//! payload of the form `{"env":{"NAME":"value",...}}`.
//!
//! The payload is assembled directly into a [`Zeroizing`] buffer, and
//! every transient escape buffer is wiped, so plaintext never survives
//! in an allocation the drop path does not cover.

use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::{Zeroize, Zeroizing};

use armorclaw_types::SecretString;

use crate::InjectorError;

/// Upper bound on a frame payload. A handful of API keys fits well
/// within this; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Assemble the `{"env":{...}}` payload into a zeroizing buffer.
///
/// Consumes the secrets: each one is revealed exactly once while its
/// escaped copy is appended, and its backing bytes are wiped before the
/// next entry is processed.
pub fn build_secret_frame(secrets: Vec<(String, SecretString)>) -> Zeroizing<Vec<u8>> {
    let mut payload = Zeroizing::new(Vec::with_capacity(256));
    payload.extend_from_slice(b"{\"env\":{");
    for (i, (name, secret)) in secrets.into_iter().enumerate() {
        if i > 0 {
            payload.push(b',');
        }
        let name_json = serde_json::to_vec(&name).expect("string serializes");
        payload.extend_from_slice(&name_json);
        payload.push(b':');
        secret.reveal_once(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            let mut value_json =
                serde_json::to_vec(text.as_ref()).expect("string serializes");
            payload.extend_from_slice(&value_json);
            value_json.zeroize();
            if let std::borrow::Cow::Owned(mut owned) = text {
                owned.zeroize();
            }
        });
    }
    payload.extend_from_slice(b"}}");
    payload
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), InjectorError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| InjectorError::Protocol("frame too large".to_string()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed frame into a zeroizing buffer.
///
/// This is the worker-side half of the protocol; the bridge only uses
/// it in tests.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Zeroizing<Vec<u8>>, InjectorError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(InjectorError::Protocol(format!(
            "frame length {len} exceeds cap"
        )));
    }
    let mut payload = Zeroizing::new(vec![0u8; len]);
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    Ok(payload)
}

/// Decoded frame payload. Only the `env` field is read; anything else
/// is ignored.
#[derive(Debug, Deserialize)]
pub struct SecretFrame {
    /// Environment entries the worker sets for itself.
    pub env: BTreeMap<String, String>,
}

/// Parse a frame payload.
pub fn parse_secret_frame(payload: &[u8]) -> Result<SecretFrame, InjectorError> {
    serde_json::from_slice(payload).map_err(|e| InjectorError::Protocol(e.to_string()))
}
