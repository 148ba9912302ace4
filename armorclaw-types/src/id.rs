//! Identifiers for credentials, workers, rooms, senders, events, and
//! bus subscribers.
//!
//! Each identifier is its own newtype so a worker ID can never be
//! handed to the keystore by accident. Bridge-minted identifiers
//! (credentials, workers, subscribers) carry a recognizable shape the
//! boundary can validate; chat-protocol identifiers (rooms, senders,
//! events) are opaque and stored as received.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A keystore record identifier, minted as `cred-` plus 16 lowercase
/// hex characters.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CredentialId(pub String);

impl CredentialId {
    /// The prefix every bridge-minted credential ID carries.
    pub const PREFIX: &'static str = "cred-";

    /// Wrap a raw identifier without validating it.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Whether this ID has the shape the keystore mints. The RPC
    /// boundary rejects anything else as invalid input before a
    /// lookup is attempted.
    pub fn is_well_formed(&self) -> bool {
        self.0
            .strip_prefix(Self::PREFIX)
            .is_some_and(|rest| rest.len() == 16 && rest.bytes().all(is_lower_hex))
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A worker-session identifier, minted as `worker-` plus 16 lowercase
/// hex characters. Doubles as the stem of the worker's secret-socket
/// file name.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// The prefix every bridge-minted worker ID carries.
    pub const PREFIX: &'static str = "worker-";

    /// Wrap a raw identifier without validating it.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The file name of this worker's secret socket.
    pub fn socket_file_name(&self) -> String {
        format!("{}.sock", self.0)
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An event-bus subscriber handle. Allocated from a per-bus counter.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    /// Wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint the ID for the `n`th subscription on a bus.
    pub fn from_index(n: u64) -> Self {
        Self(format!("sub-{n}"))
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A control-plane room identifier, in whatever form the chat protocol
/// uses. Opaque to the bridge; the trust policy matches it exactly.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoomId(pub String);

/// A control-plane sender identifier. Opaque; the trust policy matches
/// it exactly or by `*<sep><domain>` suffix.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SenderId(pub String);

/// A protocol-assigned event identifier. Opaque.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventId(pub String);

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

/// The chat-protocol identifiers share plain construction and borrowing;
/// they carry no bridge-imposed shape.
macro_rules! opaque_id {
    ($($name:ident)*) => {$(
        impl $name {
            /// Wrap a raw identifier as received from the protocol.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    )*};
}

opaque_id!(RoomId SenderId EventId);

macro_rules! id_conversions {
    ($($name:ident)*) => {$(
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }
    )*};
}

id_conversions!(CredentialId WorkerId SubscriberId RoomId SenderId EventId);
