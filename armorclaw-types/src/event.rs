//! The control-plane event shape the gate processes.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::id::{EventId, RoomId, SenderId};

/// A single inbound control-plane event.
///
/// Created on ingress from the chat client, mutated exactly once by the
/// PII scrub pass, then either dispatched to subscribers or dropped.
/// Never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Event type tag from the chat protocol (e.g. `m.room.message`).
    pub event_type: String,
    /// The room the event arrived in.
    pub room_id: RoomId,
    /// The sender, in the chat protocol's user-ID form.
    pub sender: SenderId,
    /// Protocol-assigned event ID.
    pub event_id: EventId,
    /// Opaque content map. The scrubber rewrites string values in place.
    #[serde(default)]
    pub content: Map<String, serde_json::Value>,
    /// Number of PII redactions applied by the scrub pass.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub redaction_count: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl RoomEvent {
    /// Create a message event with the given plain-text body.
    pub fn message(
        room_id: impl Into<RoomId>,
        sender: impl Into<SenderId>,
        event_id: impl Into<EventId>,
        body: impl Into<String>,
    ) -> Self {
        let mut content = Map::new();
        content.insert("body".to_string(), serde_json::Value::String(body.into()));
        Self {
            event_type: "m.room.message".to_string(),
            room_id: room_id.into(),
            sender: sender.into(),
            event_id: event_id.into(),
            content,
            redaction_count: 0,
        }
    }

    /// The plain-text body, if the content carries one.
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(|v| v.as_str())
    }
}
