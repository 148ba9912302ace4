//! The chat control-plane seam.
//!
//! The room protocol client is an external collaborator: the bridge
//! consumes it as an opaque event source/sink behind [`ChatClient`].
//! The sync loop pulls events, pushes them through the zero-trust gate,
//! and retries transient client failures with backoff.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use armorclaw_gate::{RoomNotifier, ZeroTrustGate};
use armorclaw_types::{BridgeError, RoomEvent, RoomId};

use crate::retry::{retry_transient, with_call_timeout};

/// An opaque room-protocol client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Block for the next inbound event. `Ok(None)` means the stream
    /// has ended and the sync loop should stop.
    async fn next_event(&self) -> Result<Option<RoomEvent>, BridgeError>;

    /// Post a message to a room.
    async fn send_message(&self, room: &RoomId, text: &str) -> Result<(), BridgeError>;
}

/// A client for deployments without a chat control plane wired in:
/// yields no events and drops outbound messages.
pub struct NullChatClient {
    _private: (),
}

impl NullChatClient {
    /// Create the null client.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for NullChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for NullChatClient {
    async fn next_event(&self) -> Result<Option<RoomEvent>, BridgeError> {
        // No control plane: park forever; shutdown cancels the loop.
        std::future::pending::<()>().await;
        Ok(None)
    }

    async fn send_message(&self, _room: &RoomId, _text: &str) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// [`RoomNotifier`] over a [`ChatClient`], applying the outbound call
/// deadline and transient-retry policy.
pub struct ChatNotifier {
    client: Arc<dyn ChatClient>,
    cancel: CancellationToken,
}

impl ChatNotifier {
    /// Wrap a client.
    pub fn new(client: Arc<dyn ChatClient>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }
}

#[async_trait]
impl RoomNotifier for ChatNotifier {
    async fn notify(&self, room: &RoomId, message: &str) -> Result<(), BridgeError> {
        retry_transient(
            || with_call_timeout(self.client.send_message(room, message)),
            &self.cancel,
        )
        .await
    }
}

/// Pull events from the client and feed the gate until cancelled or the
/// stream ends.
pub async fn run_sync_loop(
    client: Arc<dyn ChatClient>,
    gate: Arc<ZeroTrustGate>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = retry_transient(|| client.next_event(), &cancel) => next,
        };
        match next {
            Ok(Some(event)) => {
                if let Err(e) = gate.process_event(event).await {
                    // A failed audit append on a deny path lands here;
                    // the event is already dropped at this point.
                    error!(error = %e, "gate processing failed");
                }
            }
            Ok(None) => {
                warn!("chat event stream ended");
                break;
            }
            Err(BridgeError::Cancelled) => break,
            Err(e) => {
                error!(error = %e, "chat sync failed after retries");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armorclaw_audit::{AuditError, AuditEvent, AuditSink};
    use armorclaw_bus::{BusConfig, EventBus, SubscriptionFilter};
    use armorclaw_gate::{Command, CommandHandler, GateConfig, PolicyHandle};
    use std::sync::Mutex as StdMutex;

    struct NullSink;

    #[async_trait]
    impl AuditSink for NullSink {
        async fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
            Ok(())
        }
    }

    struct NullHandler;

    #[async_trait]
    impl CommandHandler for NullHandler {
        async fn handle(
            &self,
            _command: Command,
            _event: &RoomEvent,
        ) -> Result<Option<String>, BridgeError> {
            Ok(None)
        }
    }

    /// Replays a fixed set of events, then ends the stream.
    struct ReplayClient {
        events: StdMutex<Vec<RoomEvent>>,
    }

    #[async_trait]
    impl ChatClient for ReplayClient {
        async fn next_event(&self) -> Result<Option<RoomEvent>, BridgeError> {
            let mut events = self.events.lock().unwrap();
            if events.is_empty() {
                Ok(None)
            } else {
                Ok(Some(events.remove(0)))
            }
        }

        async fn send_message(&self, _room: &RoomId, _text: &str) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_loop_feeds_the_gate_until_stream_end() {
        let policy = Arc::new(PolicyHandle::new());
        policy.set_trusted_senders(vec!["*:example.com".to_string()]);
        policy.set_trusted_rooms(vec!["!ops:example.com".to_string()]);
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let gate = Arc::new(ZeroTrustGate::new(
            GateConfig::default(),
            policy,
            Arc::new(NullSink),
            bus.clone(),
            Arc::new(NullHandler),
        ));
        let mut sub = bus.subscribe(SubscriptionFilter::default()).unwrap();

        let client = Arc::new(ReplayClient {
            events: StdMutex::new(vec![
                RoomEvent::message("!ops:example.com", "@a:example.com", "$1", "one"),
                RoomEvent::message("!ops:example.com", "@evil:other.com", "$2", "two"),
                RoomEvent::message("!ops:example.com", "@b:example.com", "$3", "three"),
            ]),
        });

        run_sync_loop(client, gate, CancellationToken::new()).await;

        assert_eq!(sub.receiver.recv().await.unwrap().body(), Some("one"));
        assert_eq!(sub.receiver.recv().await.unwrap().body(), Some("three"));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn null_client_drops_outbound() {
        let client = NullChatClient::new();
        client
            .send_message(&RoomId::new("!r:x"), "hello")
            .await
            .unwrap();
    }
}
