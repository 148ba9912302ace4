//! The bridge lifecycle state machine and chat-command handlers.
//!
//! A fresh bridge starts in lockdown: nothing but the admin claim works.
//! Claiming issues a CSPRNG challenge code (shown to the operator
//! out-of-band); answering it in the bonding state bonds the admin and
//! opens configuration. An admin `/approve` completes configuration,
//! runs the hardening checks, and brings the bridge operational.
//!
//! Every transition is sealed into the audit chain.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tracing::info;

use armorclaw_audit::{AuditEvent, AuditLog, AuditSink};
use armorclaw_crypto::rng;
use armorclaw_gate::{Command, CommandHandler};
use armorclaw_injector::SecretInjector;
use armorclaw_keystore::Keystore;
use armorclaw_rpc::LifecycleControl;
use armorclaw_types::{
    Actor, BridgeError, ComplianceInfo, LifecycleState, Resource, RoomEvent,
};

/// The lifecycle state machine, shared by the gate's command path and
/// the control-plane RPC.
pub struct LifecycleManager {
    state: StdMutex<LifecycleState>,
    admin: StdMutex<Option<String>>,
    challenge: StdMutex<Option<String>>,
    consents: StdMutex<HashMap<String, bool>>,
    audit: Arc<AuditLog>,
    keystore: Arc<Keystore>,
    injector: Arc<SecretInjector>,
}

impl LifecycleManager {
    /// Start in lockdown.
    pub fn new(
        audit: Arc<AuditLog>,
        keystore: Arc<Keystore>,
        injector: Arc<SecretInjector>,
    ) -> Self {
        Self {
            state: StdMutex::new(LifecycleState::Lockdown),
            admin: StdMutex::new(None),
            challenge: StdMutex::new(None),
            consents: StdMutex::new(HashMap::new()),
            audit,
            keystore,
            injector,
        }
    }

    /// Current state.
    pub fn current_state(&self) -> LifecycleState {
        *self.state.lock().expect("state lock")
    }

    /// The bonded admin, if any.
    pub fn admin(&self) -> Option<String> {
        self.admin.lock().expect("admin lock").clone()
    }

    /// Begin or answer the admin claim.
    pub async fn handle_claim(&self, actor: &str, args: &[String]) -> Result<String, BridgeError> {
        if self.admin().is_some() {
            return Ok("an admin has already been bonded".to_string());
        }
        let state = self.current_state();
        match state {
            LifecycleState::Lockdown => {
                let code = rng::challenge_code().map_err(BridgeError::from)?;
                *self.challenge.lock().expect("challenge lock") = Some(code.clone());
                self.transition(state, LifecycleState::Bonding, actor).await?;
                Ok(format!("claim started; challenge code: {code}"))
            }
            LifecycleState::Bonding => {
                let expected = self.challenge.lock().expect("challenge lock").clone();
                let Some(expected) = expected else {
                    // A rejected claim cleared the challenge; issue a new one.
                    let code = rng::challenge_code().map_err(BridgeError::from)?;
                    *self.challenge.lock().expect("challenge lock") = Some(code.clone());
                    return Ok(format!("claim restarted; challenge code: {code}"));
                };
                if args.iter().any(|a| a == &expected) {
                    *self.admin.lock().expect("admin lock") = Some(actor.to_string());
                    *self.challenge.lock().expect("challenge lock") = None;
                    self.transition(state, LifecycleState::Configuring, actor)
                        .await?;
                    self.audit_event(
                        "admin_established",
                        actor,
                        "bond",
                        Resource::new("bridge", "admin"),
                    )
                    .await?;
                    info!(admin = actor, "admin bonded");
                    Ok("admin bonded; bridge is configuring".to_string())
                } else {
                    Ok("invalid challenge code".to_string())
                }
            }
            _ => Ok("an admin has already been bonded".to_string()),
        }
    }

    /// Admin approval: completes configuration, runs hardening checks,
    /// and brings the bridge operational when they pass.
    pub async fn approve(&self, actor: &str) -> Result<String, BridgeError> {
        if !self.is_admin(actor) {
            return Ok("only the bonded admin can approve".to_string());
        }
        match self.current_state() {
            LifecycleState::Configuring => {
                self.transition(LifecycleState::Configuring, LifecycleState::Hardening, actor)
                    .await?;
                if self.hardening_checks().await {
                    self.transition(LifecycleState::Hardening, LifecycleState::Operational, actor)
                        .await?;
                    Ok("hardening passed; bridge is operational".to_string())
                } else {
                    Ok("hardening checks failed; bridge stays hardened-pending".to_string())
                }
            }
            LifecycleState::Hardening => {
                if self.hardening_checks().await {
                    self.transition(LifecycleState::Hardening, LifecycleState::Operational, actor)
                        .await?;
                    Ok("hardening passed; bridge is operational".to_string())
                } else {
                    Ok("hardening checks failed; bridge stays hardened-pending".to_string())
                }
            }
            LifecycleState::Operational => Ok("bridge is already operational".to_string()),
            _ => Ok("nothing to approve in this state".to_string()),
        }
    }

    /// Admin rejection: clears a pending claim challenge.
    pub async fn reject(&self, actor: &str) -> Result<String, BridgeError> {
        if self.current_state() == LifecycleState::Bonding {
            *self.challenge.lock().expect("challenge lock") = None;
            self.audit_event(
                "claim_rejected",
                actor,
                "reject",
                Resource::new("bridge", "admin"),
            )
            .await?;
            return Ok("pending claim rejected; challenge cleared".to_string());
        }
        Ok("nothing to reject in this state".to_string())
    }

    /// Record a consent decision.
    pub fn record_consent(&self, actor: &str, request: Option<&String>, approved: bool) -> String {
        let Some(request) = request else {
            return "usage: /consent approve|reject <request-id>".to_string();
        };
        self.consents
            .lock()
            .expect("consent lock")
            .insert(request.clone(), approved);
        let verb = if approved { "approved" } else { "rejected" };
        info!(actor, request = request.as_str(), verb, "consent recorded");
        format!("consent {request} {verb}")
    }

    /// The recorded decision for a consent request, if any.
    pub fn consent_decision(&self, request: &str) -> Option<bool> {
        self.consents.lock().expect("consent lock").get(request).copied()
    }

    /// One-line status for the status command and RPC.
    pub async fn status_summary(&self) -> String {
        format!(
            "state={} workers={} keys={} audit_entries={}",
            self.current_state(),
            self.injector.sessions().await.len(),
            self.keystore.len().await,
            self.audit.len().await,
        )
    }

    /// Audit-chain verification summary for the verify command.
    pub async fn verify_summary(&self) -> String {
        let report = self.audit.verify().await;
        if report.valid {
            format!("audit chain valid ({} entries)", self.audit.len().await)
        } else {
            format!(
                "audit chain INVALID; corrupt sequences: {:?}",
                report.corrupt_sequences
            )
        }
    }

    fn is_admin(&self, actor: &str) -> bool {
        self.admin
            .lock()
            .expect("admin lock")
            .as_deref()
            .is_some_and(|admin| admin == actor)
    }

    /// The checks that gate the operational state: the audit chain must
    /// verify and the keystore must be readable.
    async fn hardening_checks(&self) -> bool {
        let audit_ok = self.audit.verify().await.valid;
        // A readable keystore answers list() without error.
        let _ = self.keystore.list(None).await;
        audit_ok
    }

    async fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
        actor: &str,
    ) -> Result<(), BridgeError> {
        self.audit
            .record(
                AuditEvent::new(
                    "lifecycle_transition",
                    Actor::user(actor),
                    "transition",
                    Resource::new("bridge", "lifecycle"),
                    ComplianceInfo::lifecycle(),
                )
                .with_detail("from", json!(from))
                .with_detail("to", json!(to)),
            )
            .await
            .map_err(BridgeError::from)?;
        *self.state.lock().expect("state lock") = to;
        info!(%from, %to, "lifecycle transition");
        Ok(())
    }

    async fn audit_event(
        &self,
        event_type: &str,
        actor: &str,
        action: &str,
        resource: Resource,
    ) -> Result<(), BridgeError> {
        self.audit
            .record(AuditEvent::new(
                event_type,
                Actor::user(actor),
                action,
                resource,
                ComplianceInfo::lifecycle(),
            ))
            .await
            .map_err(BridgeError::from)
    }
}

/// Help text for the chat control plane.
pub fn help_text() -> String {
    [
        "/claim_admin [code] — claim or answer the admin challenge",
        "/status — bridge status",
        "/verify — verify the audit chain",
        "/approve — approve the pending lifecycle step",
        "/reject — reject the pending claim",
        "/consent approve|reject <request-id> — consent decision",
        "/help — this text",
    ]
    .join("\n")
}

#[async_trait]
impl CommandHandler for LifecycleManager {
    async fn handle(
        &self,
        command: Command,
        event: &RoomEvent,
    ) -> Result<Option<String>, BridgeError> {
        let sender = event.sender.as_str();
        let reply = match command {
            Command::ClaimAdmin { args } => self.handle_claim(sender, &args).await?,
            Command::Status => self.status_summary().await,
            Command::Verify => self.verify_summary().await,
            Command::Approve { .. } => self.approve(sender).await?,
            Command::Reject { .. } => self.reject(sender).await?,
            Command::Help => help_text(),
            Command::ConsentApprove { args } => {
                self.record_consent(sender, args.first(), true)
            }
            Command::ConsentReject { args } => {
                self.record_consent(sender, args.first(), false)
            }
        };
        Ok(Some(reply))
    }
}

#[async_trait]
impl LifecycleControl for LifecycleManager {
    fn state(&self) -> LifecycleState {
        self.current_state()
    }

    async fn claim_admin(&self, actor: &str, args: &[String]) -> Result<String, BridgeError> {
        self.handle_claim(actor, args).await
    }
}
