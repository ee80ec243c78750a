//! Unix-socket daemon: accept loop, NDJSON framing, graceful shutdown.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agentdb_core::events::EventKind;
use agentdb_core::{Error, MemoryConfig, Result};

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, PARSE_ERROR};
use crate::pidfile::PidFile;
use crate::service::MemoryService;

/// Bounded deadline for draining in-flight connections at shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Minimal response used when even error serialization fails.
const FALLBACK_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Daemon lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

/// Handle used to trigger a graceful shutdown.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    /// Request shutdown; idempotent.
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

/// The memory daemon server.
pub struct DaemonServer {
    config: MemoryConfig,
    service: Arc<MemoryService>,
    state_tx: watch::Sender<ServerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl DaemonServer {
    #[must_use]
    pub fn new(config: MemoryConfig, service: Arc<MemoryService>) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Starting);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            service,
            state_tx,
            shutdown_tx,
        }
    }

    /// Handle for external shutdown triggers (signals, tests).
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Observe lifecycle state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown. Startup order: data dir, PID liveness check,
    /// stale socket sweep, bind at 0600, PID file write, ready.
    pub async fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.config.data_dir)?;

        let pid_file = PidFile::new(self.config.pid_file());
        if let Some(address) = pid_file.live_address()? {
            return Err(Error::Validation(format!(
                "daemon already running at {address}"
            )));
        }
        sweep_stale_socket(&self.config.socket_path);

        let listener = UnixListener::bind(&self.config.socket_path)?;
        restrict_socket_permissions(&self.config.socket_path)?;

        let address = format!("unix:{}", self.config.socket_path.display());
        pid_file.acquire(&address, env!("CARGO_PKG_VERSION"))?;

        let _ = self.state_tx.send(ServerState::Ready);
        self.service
            .events()
            .emit(EventKind::DaemonStarted, json!({ "address": address }));
        info!(socket = %self.config.socket_path.display(), "daemon ready");

        let background = self.service.spawn_background_tasks();
        let mut connections: JoinSet<()> = JoinSet::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let service = Arc::clone(&self.service);
                            connections.spawn(handle_connection(stream, service));
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Graceful shutdown: stop accepting, drain with a deadline,
        // then destroy what's left.
        let _ = self.state_tx.send(ServerState::ShuttingDown);
        self.service
            .events()
            .emit(EventKind::DaemonStopping, json!({}));
        info!("draining connections");
        drop(listener);

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
            warn!("drain deadline reached, aborting remaining connections");
            connections.abort_all();
        }
        for task in background {
            task.abort();
        }

        if let Err(err) = std::fs::remove_file(&self.config.socket_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(%err, "failed to remove socket file");
            }
        }
        pid_file.release();
        let _ = self.state_tx.send(ServerState::Stopped);
        info!("daemon stopped");
        Ok(())
    }
}

/// One client connection: buffered line loop, one response per request.
async fn handle_connection(stream: UnixStream, service: Arc<MemoryService>) {
    let session_id = Uuid::new_v4().to_string();
    debug!(session_id, "client connected");

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(session_id, %err, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = respond(&service, &session_id, &line).await;
        let payload =
            serde_json::to_string(&response).unwrap_or_else(|_| FALLBACK_ERROR.to_string());
        if let Err(err) = write_half.write_all(payload.as_bytes()).await {
            debug!(session_id, %err, "connection write failed");
            break;
        }
        if write_half.write_all(b"\n").await.is_err() {
            break;
        }
    }
    debug!(session_id, "client disconnected");
}

async fn respond(service: &MemoryService, session_id: &str, line: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "parse error");
            return JsonRpcResponse::error(None, PARSE_ERROR, "parse error");
        }
    };
    if !request.is_valid() {
        return JsonRpcResponse::error(request.id, INVALID_REQUEST, "invalid request");
    }

    match service
        .dispatch(session_id, &request.method, request.params)
        .await
    {
        Ok(result) => JsonRpcResponse::success(request.id, result),
        Err(err) => {
            error!(method = %request.method, message = %err.message(), "dispatch failed");
            JsonRpcResponse::typed_error(request.id, err.rpc_code(), err.message(), err.typed_code())
        }
    }
}

/// Remove a socket file nothing is listening on.
fn sweep_stale_socket(path: &Path) {
    if path.exists() {
        debug!(path = %path.display(), "removing stale socket");
        let _ = std::fs::remove_file(path);
    }
}

fn restrict_socket_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
