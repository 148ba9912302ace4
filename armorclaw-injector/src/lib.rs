#![deny(missing_docs)]
//! Zero-disk secret handoff for the ArmorClaw bridge.
//!
//! Workers never see credentials on disk, in their image, or in
//! container metadata. Per worker, the bridge:
//!
//! 1. creates a listening Unix socket (mode 0600) in a bridge-owned
//!    directory (mode 0700)
//! 2. spawns the worker with only `ARMORCLAW_SECRET_SOCKET=<path>` in
//!    its environment
//! 3. accepts exactly one connection within the handshake deadline
//! 4. writes one length-prefixed `{"env":{...}}` frame, shuts down the
//!    write half, and waits for the worker's EOF acknowledgement
//! 5. unlinks the socket and zeroizes every plaintext buffer it held
//!
//! A timeout, a second connection during the handshake, or any I/O
//! error kills the worker before it can execute workload code, and a
//! `secret_injection_failed` entry lands in the audit log.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use armorclaw_audit::{AuditEvent, AuditSink};
use armorclaw_crypto::rng;
use armorclaw_types::{
    Actor, BridgeError, ComplianceInfo, Resource, SecretString, Severity, WorkerId,
};

pub mod frame;
pub mod spawn;

pub use spawn::{ProcessSpawner, WorkerProcess, WorkerSpawner, WorkerSpec};

/// The environment variable that tells a worker where its secret
/// socket lives. This is the only injection-related variable a worker
/// ever receives.
pub const SECRET_SOCKET_ENV: &str = "ARMORCLAW_SECRET_SOCKET";

/// Default handshake deadline.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the injection path.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InjectorError {
    /// The worker did not connect (or finish the handshake) in time.
    #[error("handshake timed out")]
    Timeout,

    /// Something connected a second time during the handshake window.
    #[error("second connection during handshake")]
    SecondConnection,

    /// Malformed frame traffic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket or filesystem failure.
    #[error("io error: {0}")]
    Io(String),

    /// The worker could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// No session with the given worker ID.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The audit append required by this operation failed.
    #[error("audit append failed: {0}")]
    Audit(String),
}

impl From<InjectorError> for BridgeError {
    fn from(err: InjectorError) -> Self {
        match err {
            InjectorError::SessionNotFound(id) => BridgeError::SessionNotFound(id),
            InjectorError::Audit(m) => BridgeError::AuditAppendFailed(m),
            other => BridgeError::SecretInjectionFailed(other.to_string()),
        }
    }
}

/// Metadata about a live worker session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The worker ID.
    pub id: WorkerId,
    /// When the worker was spawned.
    pub spawned_at: DateTime<Utc>,
}

struct Session {
    spawned_at: DateTime<Utc>,
    socket_path: PathBuf,
    process: Box<dyn WorkerProcess>,
}

/// The per-worker secret injector and session table.
pub struct SecretInjector {
    secrets_dir: PathBuf,
    spawner: Arc<dyn WorkerSpawner>,
    audit: Arc<dyn AuditSink>,
    accept_timeout: Duration,
    sessions: tokio::sync::Mutex<HashMap<WorkerId, Session>>,
}

impl SecretInjector {
    /// Create an injector rooted at `secrets_dir`.
    pub fn new(
        secrets_dir: impl AsRef<Path>,
        spawner: Arc<dyn WorkerSpawner>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            secrets_dir: secrets_dir.as_ref().to_path_buf(),
            spawner,
            audit,
            accept_timeout: ACCEPT_TIMEOUT,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Override the handshake deadline.
    pub fn with_accept_timeout(mut self, deadline: Duration) -> Self {
        self.accept_timeout = deadline;
        self
    }

    /// Spawn a worker and hand it `secrets` over its private socket.
    ///
    /// Returns once the worker has acknowledged receipt and the socket
    /// is unlinked. On any failure the worker is killed first.
    pub async fn start_worker(
        &self,
        spec: &WorkerSpec,
        secrets: Vec<(String, SecretString)>,
    ) -> Result<WorkerId, InjectorError> {
        let id = WorkerId::new(
            rng::generate_id("worker").map_err(|e| InjectorError::Spawn(e.to_string()))?,
        );
        let socket_path = self.secrets_dir.join(id.socket_file_name());

        self.prepare_secrets_dir().await?;
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| InjectorError::Io(format!("bind {}: {e}", socket_path.display())))?;
        set_mode(&socket_path, 0o600)?;

        let env = vec![(
            SECRET_SOCKET_ENV.to_string(),
            socket_path.display().to_string(),
        )];
        let mut process = match self.spawner.spawn(spec, &env).await {
            Ok(process) => process,
            Err(e) => {
                drop(listener);
                let _ = tokio::fs::remove_file(&socket_path).await;
                return Err(InjectorError::Spawn(e.to_string()));
            }
        };

        // Building the frame consumes and wipes the individual secrets;
        // the assembled payload zeroizes on the drop below, success and
        // failure paths alike.
        let payload = frame::build_secret_frame(secrets);
        let result = self.handshake(&listener, &payload).await;
        drop(payload);
        drop(listener);
        let _ = tokio::fs::remove_file(&socket_path).await;

        match result {
            Ok(()) => {
                self.audit_injection(&id, "secret_injected", Severity::Medium, None)
                    .await;
                debug!(worker = %id, "secret handoff complete");
                self.sessions.lock().await.insert(
                    id.clone(),
                    Session {
                        spawned_at: Utc::now(),
                        socket_path,
                        process,
                    },
                );
                Ok(id)
            }
            Err(e) => {
                if let Err(kill_err) = process.kill().await {
                    warn!(worker = %id, error = %kill_err, "failed to kill worker");
                }
                self.audit_injection(
                    &id,
                    "secret_injection_failed",
                    Severity::High,
                    Some(&e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Terminate a worker and confirm its socket is gone.
    ///
    /// Emits `secret_cleaned`.
    pub async fn stop_worker(&self, id: &WorkerId) -> Result<(), InjectorError> {
        let mut session = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| InjectorError::SessionNotFound(id.to_string()))?;
        if let Err(e) = session.process.kill().await {
            warn!(worker = %id, error = %e, "kill on stop failed");
        }
        // The socket was unlinked at handoff time; tolerate a leftover.
        if tokio::fs::metadata(&session.socket_path).await.is_ok() {
            warn!(worker = %id, "socket still present at stop, removing");
            let _ = tokio::fs::remove_file(&session.socket_path).await;
        }
        self.audit_injection(id, "secret_cleaned", Severity::Low, None)
            .await;
        Ok(())
    }

    /// Live sessions, for status reporting.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                spawned_at: s.spawned_at,
            })
            .collect()
    }

    /// Stop every live worker. Used at shutdown.
    pub async fn shutdown_all(&self) {
        let ids: Vec<WorkerId> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop_worker(&id).await {
                warn!(worker = %id, error = %e, "shutdown stop failed");
            }
        }
    }

    async fn prepare_secrets_dir(&self) -> Result<(), InjectorError> {
        tokio::fs::create_dir_all(&self.secrets_dir)
            .await
            .map_err(|e| InjectorError::Io(e.to_string()))?;
        set_mode(&self.secrets_dir, 0o700)
    }

    /// Accept exactly one connection and run the frame exchange.
    ///
    /// A second connection arriving while the handshake is in flight
    /// fails the whole injection.
    async fn handshake(
        &self,
        listener: &UnixListener,
        payload: &[u8],
    ) -> Result<(), InjectorError> {
        let (mut stream, _) = timeout(self.accept_timeout, listener.accept())
            .await
            .map_err(|_| InjectorError::Timeout)?
            .map_err(|e| InjectorError::Io(e.to_string()))?;

        let handoff = handoff(&mut stream, payload);
        tokio::select! {
            result = timeout(self.accept_timeout, handoff) => {
                result.map_err(|_| InjectorError::Timeout)?
            }
            _ = listener.accept() => Err(InjectorError::SecondConnection),
        }
    }

    async fn audit_injection(
        &self,
        id: &WorkerId,
        event_type: &str,
        severity: Severity,
        error: Option<&str>,
    ) {
        let mut event = AuditEvent::new(
            event_type,
            Actor::system(),
            "inject",
            Resource::new("worker", id.as_str()),
            ComplianceInfo::security(severity),
        );
        if let Some(error) = error {
            event = event.with_detail("error", json!(error));
        }
        if let Err(e) = self.audit.record(event).await {
            warn!(worker = %id, error = %e, "injection audit append failed");
        }
    }
}

/// Write the frame, half-close, and wait for the worker's EOF.
async fn handoff(stream: &mut UnixStream, payload: &[u8]) -> Result<(), InjectorError> {
    frame::write_frame(stream, payload).await?;
    stream
        .shutdown()
        .await
        .map_err(|e| InjectorError::Io(e.to_string()))?;
    let mut sink = [0u8; 64];
    loop {
        match stream.read(&mut sink).await {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(InjectorError::Io(e.to_string())),
        }
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<(), InjectorError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| InjectorError::Io(e.to_string()))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use armorclaw_audit::AuditError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
            })
        }
        fn types(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
            self.events.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    struct StubProcess {
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerProcess for StubProcess {
        async fn kill(&mut self) -> Result<(), BridgeError> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn wait(&mut self) -> Result<Option<i32>, BridgeError> {
            Ok(Some(0))
        }
    }

    /// How the stub "worker" behaves once spawned.
    #[derive(Clone, Copy, PartialEq)]
    enum WorkerBehavior {
        ReadAndAck,
        NeverConnect,
        ConnectTwice,
    }

    struct StubSpawner {
        behavior: WorkerBehavior,
        killed: Arc<AtomicBool>,
        received: Arc<StdMutex<Option<BTreeMap<String, String>>>>,
    }

    impl StubSpawner {
        fn new(behavior: WorkerBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                killed: Arc::new(AtomicBool::new(false)),
                received: Arc::new(StdMutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl WorkerSpawner for StubSpawner {
        async fn spawn(
            &self,
            _spec: &WorkerSpec,
            env: &[(String, String)],
        ) -> Result<Box<dyn WorkerProcess>, BridgeError> {
            let socket = env
                .iter()
                .find(|(k, _)| k == SECRET_SOCKET_ENV)
                .map(|(_, v)| v.clone())
                .expect("socket env present");
            // The injector must never pass anything but the socket path.
            assert_eq!(env.len(), 1);

            let behavior = self.behavior;
            let received = self.received.clone();
            tokio::spawn(async move {
                match behavior {
                    WorkerBehavior::NeverConnect => {}
                    WorkerBehavior::ReadAndAck => {
                        let mut stream = UnixStream::connect(&socket).await.unwrap();
                        let payload = frame::read_frame(&mut stream).await.unwrap();
                        let parsed = frame::parse_secret_frame(&payload).unwrap();
                        *received.lock().unwrap() = Some(parsed.env);
                        // Closing the stream is the EOF acknowledgement.
                    }
                    WorkerBehavior::ConnectTwice => {
                        let _first = UnixStream::connect(&socket).await.unwrap();
                        let _second = UnixStream::connect(&socket).await.unwrap();
                        // Hold both open without ever acknowledging.
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            });
            Ok(Box::new(StubProcess {
                killed: self.killed.clone(),
            }))
        }
    }

    fn spec() -> WorkerSpec {
        WorkerSpec {
            image: "worker-image".to_string(),
            args: vec![],
        }
    }

    fn secrets() -> Vec<(String, SecretString)> {
        vec![(
            "OPENAI_API_KEY".to_string(),
            SecretString::from_string("sk-LITERAL-001".to_string()),
        )]
    }

    #[tokio::test]
    async fn happy_handoff_delivers_env_and_unlinks_socket() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new();
        let spawner = StubSpawner::new(WorkerBehavior::ReadAndAck);
        let injector = SecretInjector::new(dir.path(), spawner.clone(), sink.clone());

        let id = injector.start_worker(&spec(), secrets()).await.unwrap();

        let received = spawner.received.lock().unwrap().clone().unwrap();
        assert_eq!(received["OPENAI_API_KEY"], "sk-LITERAL-001");

        // No socket (or any other file) remains in the secrets dir.
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        assert!(!spawner.killed.load(Ordering::SeqCst));
        assert_eq!(sink.types(), vec!["secret_injected"]);
        assert_eq!(injector.sessions().await.len(), 1);
        assert_eq!(injector.sessions().await[0].id, id);
    }

    #[tokio::test]
    async fn never_connecting_worker_is_killed_on_timeout() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new();
        let spawner = StubSpawner::new(WorkerBehavior::NeverConnect);
        let injector = SecretInjector::new(dir.path(), spawner.clone(), sink.clone())
            .with_accept_timeout(Duration::from_millis(100));

        let err = injector.start_worker(&spec(), secrets()).await.unwrap_err();
        assert!(matches!(err, InjectorError::Timeout));
        assert!(spawner.killed.load(Ordering::SeqCst));
        assert_eq!(sink.types(), vec!["secret_injection_failed"]);

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert!(injector.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn second_connection_fails_the_handshake() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new();
        let spawner = StubSpawner::new(WorkerBehavior::ConnectTwice);
        let injector = SecretInjector::new(dir.path(), spawner.clone(), sink.clone())
            .with_accept_timeout(Duration::from_secs(2));

        let err = injector.start_worker(&spec(), secrets()).await.unwrap_err();
        assert!(matches!(err, InjectorError::SecondConnection));
        assert!(spawner.killed.load(Ordering::SeqCst));
        assert_eq!(sink.types(), vec!["secret_injection_failed"]);
    }

    #[tokio::test]
    async fn stop_worker_cleans_up_and_audits() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new();
        let spawner = StubSpawner::new(WorkerBehavior::ReadAndAck);
        let injector = SecretInjector::new(dir.path(), spawner.clone(), sink.clone());

        let id = injector.start_worker(&spec(), secrets()).await.unwrap();
        injector.stop_worker(&id).await.unwrap();

        assert!(spawner.killed.load(Ordering::SeqCst));
        assert!(injector.sessions().await.is_empty());
        assert_eq!(sink.types(), vec!["secret_injected", "secret_cleaned"]);
    }

    #[tokio::test]
    async fn stop_unknown_worker_is_not_found() {
        let dir = tempdir().unwrap();
        let injector = SecretInjector::new(
            dir.path(),
            StubSpawner::new(WorkerBehavior::ReadAndAck),
            RecordingSink::new(),
        );
        assert!(matches!(
            injector.stop_worker(&WorkerId::new("worker-missing")).await,
            Err(InjectorError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_all_stops_every_session() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::new();
        let spawner = StubSpawner::new(WorkerBehavior::ReadAndAck);
        let injector = SecretInjector::new(dir.path(), spawner, sink);

        injector.start_worker(&spec(), secrets()).await.unwrap();
        injector.start_worker(&spec(), secrets()).await.unwrap();
        assert_eq!(injector.sessions().await.len(), 2);
        injector.shutdown_all().await;
        assert!(injector.sessions().await.is_empty());
    }
}
