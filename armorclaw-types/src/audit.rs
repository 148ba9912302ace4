//! Actor, resource, and compliance descriptors for audit entries.
//!
//! These are NOT audit-log internals; they're the shared vocabulary any
//! subsystem uses to describe who did what to which resource. The audit
//! crate owns the chain; this module owns the words.

use serde::{Deserialize, Serialize};

/// The kind of principal behind an audited action.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A chat-room user acting through the control plane.
    User,
    /// The bridge itself (startup, lifecycle, teardown).
    System,
    /// An RPC client on the control socket.
    RpcClient,
    /// A spawned worker process.
    Worker,
}

impl ActorType {
    /// The wire name of this actor type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::System => "system",
            ActorType::RpcClient => "rpc_client",
            ActorType::Worker => "worker",
        }
    }
}

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The kind of principal.
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Principal identifier (user ID, "bridge", connection ID, worker ID).
    pub id: String,
    /// Source IP, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Session identifier, when the action belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Actor {
    /// A user actor with no IP or session.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            id: id.into(),
            ip: None,
            session: None,
        }
    }

    /// The bridge acting on its own behalf.
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: "bridge".to_string(),
            ip: None,
            session: None,
        }
    }

    /// An RPC client identified by its connection.
    pub fn rpc(conn: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::RpcClient,
            id: conn.into(),
            ip: None,
            session: None,
        }
    }
}

/// What an audited action touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind ("credential", "worker", "room", "policy", "audit_chain").
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource identifier.
    pub id: String,
}

impl Resource {
    /// Build a resource descriptor.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

/// How bad it is when this entry signals a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine, expected activity.
    Low,
    /// Sensitive activity worth reviewing.
    Medium,
    /// Privileged activity or a failed sensitive operation.
    High,
    /// Suspected tampering or security breach.
    Critical,
}

impl Severity {
    /// The wire name of this severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Compliance flags carried on every audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceInfo {
    /// Compliance category ("security", "access", "lifecycle", "retention").
    pub category: String,
    /// Severity of the event.
    pub severity: Severity,
    /// Whether protected health information was involved.
    pub phi_involved: bool,
    /// Whether this event class must always be audited.
    pub audit_required: bool,
}

impl ComplianceInfo {
    /// A security event at the given severity, audit-required, no PHI.
    pub fn security(severity: Severity) -> Self {
        Self {
            category: "security".to_string(),
            severity,
            phi_involved: false,
            audit_required: true,
        }
    }

    /// An access event at the given severity.
    pub fn access(severity: Severity) -> Self {
        Self {
            category: "access".to_string(),
            severity,
            phi_involved: false,
            audit_required: true,
        }
    }

    /// A lifecycle transition event.
    pub fn lifecycle() -> Self {
        Self {
            category: "lifecycle".to_string(),
            severity: Severity::Medium,
            phi_involved: false,
            audit_required: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn actor_constructors() {
        let actor = Actor::user("@alice:example.com");
        assert_eq!(actor.actor_type, ActorType::User);
        assert!(actor.ip.is_none());

        assert_eq!(Actor::system().id, "bridge");
    }

    #[test]
    fn actor_type_serializes_under_type_key() {
        let actor = Actor::system();
        let json = serde_json::to_value(&actor).unwrap();
        assert_eq!(json["type"], "system");
        assert!(json.get("ip").is_none());
    }
}
