#![deny(missing_docs)]
//! The ArmorClaw bridge daemon.
//!
//! A privileged host-side process that brokers a chat-room control
//! plane to short-lived sandboxed LLM workers while keeping provider
//! credentials encrypted at rest, memory-only in flight, and fully
//! audited. This crate is the composition root: it loads configuration
//! from the environment, wires the keystore, audit chain, zero-trust
//! gate, event bus, secret injector, and control-plane RPC together,
//! and owns startup, lifecycle, and graceful shutdown.
//!
//! Library users embed [`Bridge`] with their own [`ChatClient`];
//! the `armorclaw-bridge` binary wires [`NullChatClient`] and serves
//! the Unix-socket control plane alone.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use armorclaw_audit::{AuditEvent, AuditLog, AuditSink};
use armorclaw_bus::{BusConfig, EventBus};
use armorclaw_crypto::{rng, SymmetricKey};
use armorclaw_gate::{GateConfig, PolicyHandle, ZeroTrustGate};
use armorclaw_injector::{ProcessSpawner, SecretInjector};
use armorclaw_keystore::Keystore;
use armorclaw_rpc::{RpcRouter, RpcServer, RpcServerConfig};
use armorclaw_types::{
    Actor, BridgeConfig, BridgeError, ComplianceInfo, Resource, Severity,
};

pub mod chat;
pub mod lifecycle;
pub mod retry;

pub use chat::{ChatClient, ChatNotifier, NullChatClient};
pub use lifecycle::LifecycleManager;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// The assembled daemon.
pub struct Bridge {
    config: BridgeConfig,
    audit: Arc<AuditLog>,
    injector: Arc<SecretInjector>,
    bus: Arc<EventBus>,
    gate: Arc<ZeroTrustGate>,
    server: Arc<RpcServer>,
    chat: Arc<dyn ChatClient>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").finish_non_exhaustive()
    }
}

impl Bridge {
    /// Load keys, open storage, and wire every subsystem.
    ///
    /// Fails (exit code 1 territory) when the keystore master key is
    /// missing while records exist, or when any storage cannot be
    /// opened.
    pub async fn bootstrap(
        config: BridgeConfig,
        chat: Arc<dyn ChatClient>,
    ) -> Result<Self, BridgeError> {
        let cancel = CancellationToken::new();

        let audit_key_bytes =
            load_or_create_key(&config.audit_key_file, &config.audit_path, "audit").await?;
        let audit_key = SymmetricKey::from_bytes(&audit_key_bytes)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?;
        let audit = Arc::new(
            AuditLog::open(&config.audit_path, audit_key)
                .await
                .map_err(|e| BridgeError::AuditAppendFailed(e.to_string()))?,
        );

        let keystore_master =
            load_or_create_key(&config.keystore_key_file, &config.keystore_path, "keystore")
                .await?;
        let keystore = Arc::new(
            Keystore::open(&config.keystore_path, &keystore_master)
                .await
                .map_err(BridgeError::from)?
                .with_audit_sink(audit.clone() as Arc<dyn AuditSink>),
        );

        let injector = Arc::new(SecretInjector::new(
            &config.secrets_dir,
            Arc::new(ProcessSpawner::new()),
            audit.clone() as Arc<dyn AuditSink>,
        ));
        let bus = Arc::new(EventBus::new(BusConfig::default()));

        let policy = Arc::new(PolicyHandle::new());
        policy.set_trusted_senders(config.trusted_senders.clone());
        policy.set_trusted_rooms(config.trusted_rooms.clone());

        let lifecycle = Arc::new(LifecycleManager::new(
            audit.clone(),
            keystore.clone(),
            injector.clone(),
        ));

        let notifier = Arc::new(ChatNotifier::new(chat.clone(), cancel.clone()));
        let gate = Arc::new(
            ZeroTrustGate::new(
                GateConfig {
                    reject_untrusted: config.reject_untrusted,
                    allow_any_sender: config.allow_any_sender,
                    consent_prefix: "consent".to_string(),
                },
                policy,
                audit.clone() as Arc<dyn AuditSink>,
                bus.clone(),
                lifecycle.clone(),
            )
            .with_notifier(notifier),
        );

        let router = Arc::new(RpcRouter::new(
            keystore,
            injector.clone(),
            bus.clone(),
            audit.clone(),
            lifecycle,
            config.config_dir.clone(),
        ));
        let server = Arc::new(RpcServer::new(
            router,
            RpcServerConfig {
                rate: config.rpc_rate,
                burst: config.rpc_burst,
                max_connections: config.max_connections,
                ..Default::default()
            },
        ));

        audit
            .record(AuditEvent::new(
                "bridge_started",
                Actor::system(),
                "start",
                Resource::new("bridge", "daemon"),
                ComplianceInfo::security(Severity::Low),
            ))
            .await
            .map_err(BridgeError::from)?;
        info!(socket = %config.socket_path.display(), "bridge bootstrapped");

        Ok(Self {
            config,
            audit,
            injector,
            bus,
            gate,
            server,
            chat,
            cancel,
        })
    }

    /// The root cancellation token; cancelling it shuts the bridge down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve until a termination signal or cancellation, then shut down
    /// gracefully: cancel all tasks, join with a deadline, terminate
    /// remaining workers, and seal a final audit entry.
    pub async fn run(self) -> Result<(), BridgeError> {
        let rpc_task = {
            let server = self.server.clone();
            let socket = self.config.socket_path.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { server.serve(&socket, cancel).await })
        };
        let sync_task = {
            let chat = self.chat.clone();
            let gate = self.gate.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { chat::run_sync_loop(chat, gate, cancel).await })
        };
        let reap_task = {
            let bus = self.bus.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(REAP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            bus.reap_idle();
                        }
                    }
                }
            })
        };

        wait_for_shutdown(&self.cancel).await;
        self.cancel.cancel();

        let joins = async {
            let _ = sync_task.await;
            let _ = reap_task.await;
            rpc_task.await
        };
        let rpc_result = match tokio::time::timeout(SHUTDOWN_DEADLINE, joins).await {
            Ok(Ok(result)) => result.map_err(|e| BridgeError::Other(Box::new(e))),
            Ok(Err(join_err)) => Err(BridgeError::Other(Box::new(join_err))),
            Err(_) => {
                warn!("shutdown deadline expired; forcing worker termination");
                Ok(())
            }
        };

        self.injector.shutdown_all().await;
        if let Err(e) = self
            .audit
            .record(AuditEvent::new(
                "bridge_stopped",
                Actor::system(),
                "stop",
                Resource::new("bridge", "daemon"),
                ComplianceInfo::security(Severity::Low),
            ))
            .await
        {
            error!(error = %e, "final audit entry failed");
        }
        info!("bridge stopped");
        rpc_result
    }
}

/// Block until SIGINT, SIGTERM, or cancellation.
async fn wait_for_shutdown(cancel: &CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "SIGTERM handler failed; relying on ctrl-c");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                }
                return;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
            _ = term.recv() => info!("terminate received"),
        }
    }
    #[cfg(not(unix))]
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

/// Read a hex-encoded 32-byte key file. When the file is absent: fatal
/// if `data_path` already has records (losing the key orphans them),
/// otherwise a fresh key is generated and written with mode 0600.
async fn load_or_create_key(
    key_file: &Path,
    data_path: &Path,
    label: &str,
) -> Result<Vec<u8>, BridgeError> {
    match tokio::fs::read_to_string(key_file).await {
        Ok(contents) => {
            let bytes = hex::decode(contents.trim())
                .map_err(|e| BridgeError::Crypto(format!("{label} key file: {e}")))?;
            if bytes.len() != 32 {
                return Err(BridgeError::Crypto(format!(
                    "{label} key file: expected 32 bytes, got {}",
                    bytes.len()
                )));
            }
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if tokio::fs::metadata(data_path).await.is_ok() {
                return Err(BridgeError::KeystoreUnavailable(format!(
                    "{label} master key missing at {} while {} exists",
                    key_file.display(),
                    data_path.display()
                )));
            }
            let bytes = rng::random_bytes(32).map_err(BridgeError::from)?;
            if let Some(parent) = key_file.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BridgeError::Other(Box::new(e)))?;
            }
            write_key_file(key_file, &hex::encode(&bytes)).await?;
            info!(file = %key_file.display(), "generated fresh {label} master key");
            Ok(bytes)
        }
        Err(e) => Err(BridgeError::Other(Box::new(e))),
    }
}

async fn write_key_file(path: &Path, hex_key: &str) -> Result<(), BridgeError> {
    use tokio::io::AsyncWriteExt;
    let mut options = tokio::fs::OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(path)
        .await
        .map_err(|e| BridgeError::Other(Box::new(e)))?;
    file.write_all(hex_key.as_bytes())
        .await
        .map_err(|e| BridgeError::Other(Box::new(e)))?;
    file.flush()
        .await
        .map_err(|e| BridgeError::Other(Box::new(e)))?;
    Ok(())
}
