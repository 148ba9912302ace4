#![deny(missing_docs)]
//! Zero-trust ingress gate for the ArmorClaw bridge.
//!
//! Every inbound control-plane event passes through, in order:
//!
//! 1. sender allowlist (exact + `*<sep><domain>` wildcards)
//! 2. room allowlist (exact)
//! 3. PII scrub (redaction count recorded on the event)
//! 4. command dispatch (`/`-prefixed bodies the bridge recognizes)
//! 5. fan-out to event-bus subscribers
//!
//! Deny paths always append a security audit entry; whether the sender
//! is told anything depends on `reject_untrusted` (default: silent
//! drop). An empty allowlist denies everything unless the deployment
//! explicitly opts into the legacy allow-all behavior.
//!
//! ## Design
//!
//! The gate owns no subsystem. The audit log, event bus, command
//! handler, and outbound notifier are traits injected at construction,
//! so nothing holds a back-reference to the gate and tests compose
//! stubs freely.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use armorclaw_audit::{AuditEvent, AuditSink};
use armorclaw_bus::EventBus;
use armorclaw_types::{Actor, BridgeError, ComplianceInfo, Resource, RoomEvent, RoomId, Severity};

pub mod command;
pub mod limit;
pub mod policy;
pub mod scrub;

pub use command::Command;
pub use limit::{ConnectionLimiter, ConnectionPermit, RateLimiter};
pub use policy::{PolicyHandle, TrustPolicy};
pub use scrub::PiiScrubber;

/// Gate policy knobs.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Send a single rejection notice to untrusted senders instead of a
    /// silent drop.
    pub reject_untrusted: bool,
    /// Legacy behavior: an empty allowlist admits everyone. Off by
    /// default; new deployments are deny-all until configured.
    pub allow_any_sender: bool,
    /// Command token for consent approve/reject, without the slash.
    pub consent_prefix: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            reject_untrusted: false,
            allow_any_sender: false,
            consent_prefix: "consent".to_string(),
        }
    }
}

/// Where recognized commands go. Implemented by the bridge's lifecycle
/// layer, which may mutate keystore and lockdown state.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute `command`, returning an optional reply for the room.
    async fn handle(
        &self,
        command: Command,
        event: &RoomEvent,
    ) -> Result<Option<String>, BridgeError>;
}

/// Outbound path back to the control plane, for command replies and
/// rejection notices. Implemented over the chat client.
#[async_trait]
pub trait RoomNotifier: Send + Sync {
    /// Post `message` to `room`.
    async fn notify(&self, room: &RoomId, message: &str) -> Result<(), BridgeError>;
}

/// What the gate did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Dropped: sender not in the allowlist.
    DeniedSender,
    /// Dropped: room not in the allowlist.
    DeniedRoom,
    /// Consumed as a command; the handler's reply, if any, was sent.
    Command {
        /// Reply text posted back to the room.
        reply: Option<String>,
    },
    /// Fanned out to subscribers.
    Published {
        /// How many subscriber queues accepted the event.
        delivered: usize,
    },
}

/// The ingress gate.
pub struct ZeroTrustGate {
    config: GateConfig,
    policy: Arc<PolicyHandle>,
    scrubber: PiiScrubber,
    audit: Arc<dyn AuditSink>,
    bus: Arc<EventBus>,
    handler: Arc<dyn CommandHandler>,
    notifier: Option<Arc<dyn RoomNotifier>>,
}

impl ZeroTrustGate {
    /// Assemble a gate from its collaborators.
    pub fn new(
        config: GateConfig,
        policy: Arc<PolicyHandle>,
        audit: Arc<dyn AuditSink>,
        bus: Arc<EventBus>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            config,
            policy,
            scrubber: PiiScrubber::new(),
            audit,
            bus,
            handler,
            notifier: None,
        }
    }

    /// Attach the outbound notifier used for replies and rejection
    /// notices.
    pub fn with_notifier(mut self, notifier: Arc<dyn RoomNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The policy handle, for runtime allowlist updates.
    pub fn policy(&self) -> &Arc<PolicyHandle> {
        &self.policy
    }

    /// Run one event through the gate.
    pub async fn process_event(&self, mut event: RoomEvent) -> Result<GateOutcome, BridgeError> {
        let policy = self.policy.snapshot();

        if !self.sender_allowed(&policy, event.sender.as_str()) {
            self.audit_denial(
                "auth_rejected",
                &event,
                "sender_not_in_allowlist",
            )
            .await?;
            self.maybe_reject_notice(&event.room_id).await;
            return Ok(GateOutcome::DeniedSender);
        }

        if !self.room_allowed(&policy, event.room_id.as_str()) {
            self.audit_denial("access_denied", &event, "room_not_in_allowlist")
                .await?;
            self.maybe_reject_notice(&event.room_id).await;
            return Ok(GateOutcome::DeniedRoom);
        }

        let mut redactions = 0;
        for value in event.content.values_mut() {
            redactions += self.scrubber.scrub_value(value);
        }
        event.redaction_count = redactions;
        if redactions > 0 {
            debug!(count = redactions, event = %event.event_id, "scrubbed PII");
        }

        if let Some(body) = event.body() {
            if let Some(cmd) = command::parse(body, &self.config.consent_prefix) {
                debug!(command = cmd.token(), sender = %event.sender, "dispatching command");
                let reply = self.handler.handle(cmd, &event).await?;
                if let (Some(text), Some(notifier)) = (reply.as_deref(), &self.notifier) {
                    if let Err(e) = notifier.notify(&event.room_id, text).await {
                        warn!(error = %e, "command reply failed");
                    }
                }
                return Ok(GateOutcome::Command { reply });
            }
        }

        let delivered = self.bus.publish(&event);
        Ok(GateOutcome::Published { delivered })
    }

    fn sender_allowed(&self, policy: &TrustPolicy, sender: &str) -> bool {
        if policy.senders.is_empty() {
            return self.config.allow_any_sender;
        }
        policy.sender_matches(sender)
    }

    fn room_allowed(&self, policy: &TrustPolicy, room: &str) -> bool {
        if policy.rooms.is_empty() {
            return self.config.allow_any_sender;
        }
        policy.room_matches(room)
    }

    async fn audit_denial(
        &self,
        event_type: &str,
        event: &RoomEvent,
        reason: &str,
    ) -> Result<(), BridgeError> {
        self.audit
            .record(
                AuditEvent::new(
                    event_type,
                    Actor::user(event.sender.as_str()),
                    "ingress",
                    Resource::new("room", event.room_id.as_str()),
                    ComplianceInfo::security(Severity::High),
                )
                .with_detail("reason", json!(reason))
                .with_detail("event_id", json!(event.event_id.as_str())),
            )
            .await
            .map_err(BridgeError::from)
    }

    async fn maybe_reject_notice(&self, room: &RoomId) {
        if !self.config.reject_untrusted {
            return;
        }
        if let Some(notifier) = &self.notifier {
            // Deliberately uninformative: no policy details leak.
            if let Err(e) = notifier.notify(room, "not trusted").await {
                warn!(error = %e, "rejection notice failed");
            }
        }
    }
}
