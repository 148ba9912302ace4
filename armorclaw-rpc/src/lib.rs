#![deny(missing_docs)]
//! Control-plane JSON-RPC 2.0 server for the ArmorClaw bridge.
//!
//! Transport is a Unix domain socket (mode 0660) carrying line-delimited
//! JSON-RPC 2.0. Each accepted connection is handled independently and
//! processes its requests in arrival order; notifications (no `id`)
//! produce no response. A connection cap and a token-bucket rate
//! limiter bound the ingress; the per-connection idle deadline resets
//! on every message.
//!
//! Method semantics live in [`router::RpcRouter`]; wire types and error
//! codes in [`proto`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use armorclaw_gate::{ConnectionLimiter, RateLimiter};

pub mod proto;
pub mod router;

pub use proto::{RpcErrorObject, RpcRequest, RpcResponse};
pub use router::{method_allowed, LifecycleControl, RpcRouter};

/// Errors from the RPC server itself (transport, not methods).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RpcError {
    /// The socket could not be bound or configured.
    #[error("bind failed: {0}")]
    Bind(String),

    /// Accept-loop failure.
    #[error("io error: {0}")]
    Io(String),
}

/// Server transport configuration.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Requests per second admitted across the socket.
    pub rate: f64,
    /// Rate-limiter burst size.
    pub burst: u32,
    /// Hard cap on concurrent connections.
    pub max_connections: usize,
    /// Per-connection idle deadline, reset on each message.
    pub idle_timeout: Duration,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            rate: 20.0,
            burst: 40,
            max_connections: 32,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// The control-plane server.
pub struct RpcServer {
    router: Arc<RpcRouter>,
    config: RpcServerConfig,
    connections: ConnectionLimiter,
    limiter: Arc<RateLimiter>,
    next_conn: AtomicU64,
}

impl RpcServer {
    /// Build a server around a router.
    pub fn new(router: Arc<RpcRouter>, config: RpcServerConfig) -> Self {
        let connections = ConnectionLimiter::new(config.max_connections);
        let limiter = Arc::new(RateLimiter::new(config.rate, config.burst));
        Self {
            router,
            config,
            connections,
            limiter,
            next_conn: AtomicU64::new(1),
        }
    }

    /// Bind `socket_path` and serve until `cancel` fires.
    ///
    /// A stale socket file from a previous run is removed before
    /// binding; the fresh socket gets mode 0660.
    pub async fn serve(
        &self,
        socket_path: &Path,
        cancel: CancellationToken,
    ) -> Result<(), RpcError> {
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RpcError::Bind(e.to_string()))?;
        }
        match tokio::fs::remove_file(socket_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RpcError::Bind(e.to_string())),
        }
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| RpcError::Bind(format!("{}: {e}", socket_path.display())))?;
        set_mode(socket_path, 0o660)?;
        info!(socket = %socket_path.display(), "control-plane socket listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("rpc server shutting down");
                    let _ = tokio::fs::remove_file(socket_path).await;
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| RpcError::Io(e.to_string()))?;
                    self.handle_accept(stream, cancel.clone()).await;
                }
            }
        }
    }

    async fn handle_accept(&self, mut stream: UnixStream, cancel: CancellationToken) {
        let Some(permit) = self.connections.acquire() else {
            warn!("connection cap reached, refusing client");
            let refusal = RpcResponse::error(
                serde_json::Value::Null,
                proto::UNAUTHORIZED,
                "too many connections",
            );
            let _ = write_line(&mut stream, &refusal).await;
            return;
        };
        let conn_id = format!("conn-{}", self.next_conn.fetch_add(1, Ordering::Relaxed));
        let router = self.router.clone();
        let limiter = self.limiter.clone();
        let idle = self.config.idle_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, router, limiter, idle, cancel, &conn_id).await
            {
                debug!(conn = %conn_id, error = %e, "connection closed with error");
            }
        });
    }
}

/// Serve one connection: read lines, dispatch, write responses.
/// Requests on one connection are processed strictly in arrival order.
async fn handle_connection(
    stream: UnixStream,
    router: Arc<RpcRouter>,
    limiter: Arc<RateLimiter>,
    idle: Duration,
    cancel: CancellationToken,
    conn_id: &str,
) -> Result<(), RpcError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = timeout(idle, reader.read_line(&mut line)) => read,
        };
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(RpcError::Io(e.to_string())),
            Err(_) => {
                debug!(conn = conn_id, "idle deadline expired");
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let response = RpcResponse::error(
                    serde_json::Value::Null,
                    proto::PARSE_ERROR,
                    format!("parse error: {e}"),
                );
                write_line(&mut write_half, &response).await?;
                continue;
            }
        };
        if !request.is_valid() {
            if !request.is_notification() {
                let id = request.id.unwrap_or(serde_json::Value::Null);
                let response =
                    RpcResponse::error(id, proto::INVALID_REQUEST, "invalid request");
                write_line(&mut write_half, &response).await?;
            }
            continue;
        }
        if !limiter.try_acquire() {
            if let Some(id) = request.id {
                let response =
                    RpcResponse::error(id, proto::UNAUTHORIZED, "rate limit exceeded");
                write_line(&mut write_half, &response).await?;
            }
            continue;
        }

        let result = router.dispatch(&request.method, request.params, conn_id).await;
        if let Some(id) = request.id {
            let response = match result {
                Ok(value) => RpcResponse::success(id, value),
                Err(error) => RpcResponse::error(id, error.code, error.message),
            };
            write_line(&mut write_half, &response).await?;
        }
    }
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &RpcResponse,
) -> Result<(), RpcError> {
    let mut text =
        serde_json::to_string(response).map_err(|e| RpcError::Io(e.to_string()))?;
    text.push('\n');
    writer
        .write_all(text.as_bytes())
        .await
        .map_err(|e| RpcError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| RpcError::Io(e.to_string()))
}

fn set_mode(path: &Path, mode: u32) -> Result<(), RpcError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| RpcError::Bind(e.to_string()))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
