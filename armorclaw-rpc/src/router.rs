//! Method routing for the control plane.
//!
//! The router owns no policy of its own: every method call is first
//! checked against the current lifecycle state, then delegated to the
//! owning subsystem. Errors map onto the documented JSON-RPC codes in
//! [`crate::proto`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use armorclaw_audit::AuditLog;
use armorclaw_bus::{EventBus, Subscription, SubscriptionFilter};
use armorclaw_injector::{SecretInjector, WorkerSpec};
use armorclaw_keystore::Keystore;
use armorclaw_types::{
    BridgeError, CredentialId, LifecycleState, Provider, SecretString, SubscriberId, WorkerId,
};

use crate::proto::{self, RpcErrorObject};

/// The lifecycle seam the router consults before dispatch. Implemented
/// by the bridge's state machine.
#[async_trait]
pub trait LifecycleControl: Send + Sync {
    /// The current state.
    fn state(&self) -> LifecycleState;

    /// Begin or answer the admin-claim challenge. Returns the text to
    /// relay to the operator.
    async fn claim_admin(&self, actor: &str, args: &[String]) -> Result<String, BridgeError>;
}

/// Which methods are reachable in which lifecycle state.
///
/// Claiming is only possible before an admin is bonded; worker control
/// only once the bridge is fully operational; key and config management
/// from `configuring` onward.
pub fn method_allowed(state: LifecycleState, method: &str) -> bool {
    match method {
        "status" | "health" | "lifecycle.state" => true,
        "claim_admin" => matches!(state, LifecycleState::Lockdown | LifecycleState::Bonding),
        "start" | "stop" => state == LifecycleState::Operational,
        _ => state >= LifecycleState::Configuring,
    }
}

/// The control-plane method router.
pub struct RpcRouter {
    keystore: Arc<Keystore>,
    injector: Arc<SecretInjector>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    lifecycle: Arc<dyn LifecycleControl>,
    config_dir: PathBuf,
    started_at: DateTime<Utc>,
    subscriptions: tokio::sync::Mutex<HashMap<SubscriberId, Subscription>>,
}

impl RpcRouter {
    /// Assemble the router from its subsystems.
    pub fn new(
        keystore: Arc<Keystore>,
        injector: Arc<SecretInjector>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        lifecycle: Arc<dyn LifecycleControl>,
        config_dir: PathBuf,
    ) -> Self {
        Self {
            keystore,
            injector,
            bus,
            audit,
            lifecycle,
            config_dir,
            started_at: Utc::now(),
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one method call. `conn` identifies the RPC connection
    /// for logging.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Value,
        conn: &str,
    ) -> Result<Value, RpcErrorObject> {
        let state = self.lifecycle.state();
        if !method_allowed(state, method) {
            return Err(RpcErrorObject {
                code: proto::UNAUTHORIZED,
                message: format!("method {method} unavailable in state {state}"),
            });
        }
        debug!(method, conn, %state, "rpc dispatch");

        match method {
            "status" => self.status().await.map_err(to_rpc_error),
            "health" => Ok(json!({"ok": true})),
            "lifecycle.state" => Ok(json!({"state": state})),
            "claim_admin" => self.claim_admin(params, conn).await.map_err(to_rpc_error),
            "store_key" => self.store_key(params).await.map_err(to_rpc_error),
            "get_key" => self.get_key(params).await.map_err(to_rpc_error),
            "list_keys" => self.list_keys(params).await.map_err(to_rpc_error),
            "rotate_key" => self.rotate_key(params).await.map_err(to_rpc_error),
            "delete_key" => self.delete_key(params).await.map_err(to_rpc_error),
            "start" => self.start(params).await.map_err(to_rpc_error),
            "stop" => self.stop(params).await.map_err(to_rpc_error),
            "attach_config" => self.attach_config(params).await.map_err(to_rpc_error),
            "eventbus.subscribe" => self.subscribe(params).await.map_err(to_rpc_error),
            "eventbus.unsubscribe" => self.unsubscribe(params).await.map_err(to_rpc_error),
            "eventbus.poll" => self.poll(params).await.map_err(to_rpc_error),
            "eventbus.get_stats" => Ok(serde_json::to_value(self.bus.stats())
                .unwrap_or_else(|_| json!({}))),
            _ => Err(RpcErrorObject {
                code: proto::METHOD_NOT_FOUND,
                message: format!("method not found: {method}"),
            }),
        }
    }

    async fn status(&self) -> Result<Value, BridgeError> {
        let uptime = (Utc::now() - self.started_at).num_seconds();
        Ok(json!({
            "state": self.lifecycle.state(),
            "uptime_seconds": uptime,
            "workers": self.injector.sessions().await.len(),
            "keys": self.keystore.len().await,
            "bus": self.bus.stats(),
            "audit_entries": self.audit.len().await,
        }))
    }

    async fn claim_admin(&self, params: Value, conn: &str) -> Result<Value, BridgeError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            args: Vec<String>,
        }
        let p: Params = parse_params(params)?;
        let message = self.lifecycle.claim_admin(conn, &p.args).await?;
        Ok(json!({"message": message}))
    }

    async fn store_key(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            provider: String,
            token: String,
            display_name: String,
            #[serde(default)]
            tags: Vec<String>,
            #[serde(default)]
            expires_at: Option<DateTime<Utc>>,
        }
        let p: Params = parse_params(params)?;
        let provider: Provider = p.provider.parse()?;
        let id = self
            .keystore
            .store(
                provider,
                SecretString::from_string(p.token),
                &p.display_name,
                p.tags,
                p.expires_at,
            )
            .await
            .map_err(BridgeError::from)?;
        Ok(json!({"key_id": id}))
    }

    async fn get_key(&self, params: Value) -> Result<Value, BridgeError> {
        let id = key_id_param(params)?;
        let cred = self
            .keystore
            .retrieve(&id)
            .await
            .map_err(BridgeError::from)?;
        let token = cred
            .token
            .reveal_once(|b| String::from_utf8_lossy(b).into_owned());
        Ok(json!({
            "provider": cred.provider,
            "display_name": cred.display_name,
            "token": token,
        }))
    }

    async fn list_keys(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            provider: Option<String>,
        }
        let p: Params = parse_params(params)?;
        let provider = match p.provider.as_deref() {
            None | Some("") => None,
            Some(tag) => Some(tag.parse::<Provider>()?),
        };
        let keys = self.keystore.list(provider).await;
        Ok(json!({"keys": keys}))
    }

    async fn rotate_key(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            key_id: String,
            token: String,
        }
        let p: Params = parse_params(params)?;
        let id = parse_key_id(p.key_id)?;
        self.keystore
            .rotate(&id, SecretString::from_string(p.token))
            .await
            .map_err(BridgeError::from)?;
        Ok(json!({"rotated": true}))
    }

    async fn delete_key(&self, params: Value) -> Result<Value, BridgeError> {
        let id = key_id_param(params)?;
        self.keystore
            .delete(&id)
            .await
            .map_err(BridgeError::from)?;
        Ok(json!({"deleted": true}))
    }

    async fn start(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            key_id: String,
            image: String,
            #[serde(default)]
            args: Vec<String>,
        }
        let p: Params = parse_params(params)?;
        let id = parse_key_id(p.key_id)?;
        if self
            .keystore
            .is_expired(&id)
            .await
            .map_err(BridgeError::from)?
        {
            return Err(BridgeError::InvalidInput("credential expired".to_string()));
        }
        let cred = self
            .keystore
            .retrieve(&id)
            .await
            .map_err(BridgeError::from)?;
        let env_name = cred.provider.env_var().to_string();
        let spec = WorkerSpec {
            image: p.image,
            args: p.args,
        };
        let worker_id = self
            .injector
            .start_worker(&spec, vec![(env_name, cred.token)])
            .await
            .map_err(BridgeError::from)?;
        Ok(json!({"worker_id": worker_id}))
    }

    async fn stop(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            worker_id: String,
        }
        let p: Params = parse_params(params)?;
        self.injector
            .stop_worker(&WorkerId::new(p.worker_id))
            .await
            .map_err(BridgeError::from)?;
        Ok(json!({"stopped": true}))
    }

    async fn attach_config(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            content: String,
            #[serde(default)]
            encoding: Option<String>,
        }
        let p: Params = parse_params(params)?;
        validate_artifact_name(&p.name)?;
        let bytes = match p.encoding.as_deref() {
            None | Some("raw") => p.content.into_bytes(),
            Some("base64") => BASE64
                .decode(p.content.as_bytes())
                .map_err(|e| BridgeError::InvalidInput(format!("base64: {e}")))?,
            Some(other) => {
                return Err(BridgeError::InvalidInput(format!(
                    "unknown encoding: {other}"
                )))
            }
        };
        let target = self.config_dir.join(&p.name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::Other(Box::new(e)))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| BridgeError::Other(Box::new(e)))?;
        Ok(json!({"name": p.name, "bytes": bytes.len()}))
    }

    async fn subscribe(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            room_id: Option<String>,
            #[serde(default)]
            sender_id: Option<String>,
            #[serde(default)]
            event_types: Vec<String>,
        }
        let p: Params = parse_params(params)?;
        let subscription = self
            .bus
            .subscribe(SubscriptionFilter {
                room_id: p.room_id,
                sender_id: p.sender_id,
                event_types: p.event_types,
            })
            .map_err(|e| BridgeError::InvalidInput(e.to_string()))?;
        let id = subscription.id.clone();
        self.subscriptions
            .lock()
            .await
            .insert(id.clone(), subscription);
        Ok(json!({"subscription_id": id}))
    }

    async fn unsubscribe(&self, params: Value) -> Result<Value, BridgeError> {
        let id = subscription_id_param(params)?;
        self.subscriptions
            .lock()
            .await
            .remove(&id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        self.bus
            .unsubscribe(&id)
            .map_err(|e| BridgeError::SessionNotFound(e.to_string()))?;
        Ok(json!({"unsubscribed": true}))
    }

    /// Drain queued events for a subscription. Polling counts as
    /// activity for the bus's idle reaper.
    async fn poll(&self, params: Value) -> Result<Value, BridgeError> {
        #[derive(Deserialize)]
        struct Params {
            subscription_id: String,
            #[serde(default = "default_poll_max")]
            max: usize,
        }
        fn default_poll_max() -> usize {
            10
        }
        let p: Params = parse_params(params)?;
        let id = SubscriberId::new(p.subscription_id);
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        let _ = self.bus.touch(&id);
        let mut events = Vec::new();
        while events.len() < p.max {
            match subscription.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        Ok(json!({"events": events}))
    }
}

fn to_rpc_error(err: BridgeError) -> RpcErrorObject {
    RpcErrorObject {
        code: proto::error_code(&err),
        message: err.to_string(),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, BridgeError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| BridgeError::InvalidInput(e.to_string()))
}

fn key_id_param(params: Value) -> Result<CredentialId, BridgeError> {
    #[derive(Deserialize)]
    struct Params {
        key_id: String,
    }
    let p: Params = parse_params(params)?;
    parse_key_id(p.key_id)
}

/// Key IDs are keystore-minted; anything without that shape is rejected
/// as input before a lookup happens.
fn parse_key_id(raw: String) -> Result<CredentialId, BridgeError> {
    let id = CredentialId::new(raw);
    if !id.is_well_formed() {
        return Err(BridgeError::InvalidInput(format!(
            "malformed key id: {id}"
        )));
    }
    Ok(id)
}

fn subscription_id_param(params: Value) -> Result<SubscriberId, BridgeError> {
    #[derive(Deserialize)]
    struct Params {
        subscription_id: String,
    }
    let p: Params = parse_params(params)?;
    Ok(SubscriberId::new(p.subscription_id))
}

/// Reject any artifact name that could escape the config directory:
/// absolute paths, `..` segments, and anything that is not a plain
/// relative path.
pub fn validate_artifact_name(name: &str) -> Result<(), BridgeError> {
    if name.is_empty() {
        return Err(BridgeError::InvalidInput("empty artifact name".to_string()));
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return Err(BridgeError::PathTraversal(name.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(BridgeError::PathTraversal(name.to_string())),
        }
    }
    Ok(())
}
