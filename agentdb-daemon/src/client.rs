//! Memory client: discovery, request correlation, reconnection.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use agentdb_core::retry::{with_backoff, RetryConfig};
use agentdb_core::{Error, MemoryConfig, Result};

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::pidfile::PidFile;

/// Client behavior knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Spawn the daemon when nothing is listening
    pub auto_start: bool,
    /// Reconnect with backoff after a broken connection
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    /// Backoff base; delay is `base * 2^attempt`
    pub reconnect_base_delay: Duration,
    /// Binary spawned for auto-start
    pub daemon_binary: PathBuf,
    /// How long to poll for readiness after auto-start
    pub start_timeout: Duration,
}

impl ClientConfig {
    /// Derive client settings from the shared memory config.
    #[must_use]
    pub fn from_memory_config(config: &MemoryConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            pid_file: config.pid_file(),
            request_timeout: Duration::from_secs(10),
            auto_start: config.auto_start,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(100),
            daemon_binary: PathBuf::from("agentdbd"),
            start_timeout: Duration::from_secs(10),
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

struct ClientShared {
    pending: parking_lot::Mutex<PendingMap>,
    connected: AtomicBool,
    intentional_disconnect: AtomicBool,
}

impl ClientShared {
    /// Reject every in-flight request after a broken connection.
    fn fail_all_pending(&self) {
        let mut pending = self.pending.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(Error::ServerDisconnected));
        }
    }
}

/// Auto-reconnecting JSON-RPC client for the memory daemon.
pub struct MemoryClient {
    config: ClientConfig,
    shared: Arc<ClientShared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    next_id: AtomicU64,
}

impl MemoryClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(ClientShared {
                pending: parking_lot::Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                intentional_disconnect: AtomicBool::new(false),
            }),
            writer: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Discover the daemon and connect, auto-starting if configured.
    pub async fn connect(&self) -> Result<()> {
        self.shared
            .intentional_disconnect
            .store(false, Ordering::SeqCst);
        match self.try_connect().await {
            Ok(()) => Ok(()),
            Err(err) if self.config.auto_start => {
                debug!(%err, "daemon unreachable, auto-starting");
                self.spawn_daemon()?;
                self.poll_until_ready().await
            }
            Err(err) => Err(err),
        }
    }

    /// Intentional disconnect: suppresses reconnection.
    pub async fn close(&self) {
        self.shared
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        if let Some(mut write_half) = writer.take() {
            let _ = write_half.shutdown().await;
        }
        self.shared.fail_all_pending();
    }

    /// Issue one request and await its correlated response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_connected().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let request = JsonRpcRequest {
            jsonrpc: Some("2.0".to_string()),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        };
        let payload = serde_json::to_string(&request)?;

        if let Err(err) = self.send_line(&payload).await {
            self.shared.pending.lock().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ServerDisconnected),
            Err(_) => {
                // Late responses are discarded by id lookup.
                self.shared.pending.lock().remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// Convenience ping.
    pub async fn ping(&self) -> Result<Value> {
        self.call("ping", Value::Object(serde_json::Map::new())).await
    }

    async fn send_line(&self, payload: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(write_half) = writer.as_mut() else {
            return Err(Error::ServerDisconnected);
        };
        let write = async {
            write_half.write_all(payload.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
            Ok::<(), std::io::Error>(())
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(%err, "write failed, dropping connection");
                *writer = None;
                self.shared.connected.store(false, Ordering::SeqCst);
                Err(Error::ServerDisconnected)
            }
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.shared.intentional_disconnect.load(Ordering::SeqCst) {
            return Err(Error::ServerDisconnected);
        }
        if !self.config.auto_reconnect {
            return Err(Error::ServerNotRunning);
        }

        let retry = RetryConfig {
            max_retries: self.config.max_reconnect_attempts,
            base_delay: self.config.reconnect_base_delay,
            max_delay: Duration::from_secs(30),
        };
        with_backoff(&retry, || self.try_connect()).await
    }

    /// Resolve the daemon address and establish the connection.
    async fn try_connect(&self) -> Result<()> {
        let path = self.resolve_socket_path()?;
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|_| Error::ServerNotRunning)?;
        let (read_half, write_half) = stream.into_split();

        *self.writer.lock().await = Some(write_half);
        self.shared.connected.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_response(&shared, &line),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(%err, "client read loop ended");
                        break;
                    }
                }
            }
            shared.connected.store(false, Ordering::SeqCst);
            shared.fail_all_pending();
        });

        debug!(path = %path.display(), "connected to daemon");
        Ok(())
    }

    /// Socket path from config, or the PID file of a live daemon.
    fn resolve_socket_path(&self) -> Result<PathBuf> {
        if self.config.socket_path.exists() {
            return Ok(self.config.socket_path.clone());
        }
        let pid_file = PidFile::new(self.config.pid_file.clone());
        if let Some(address) = pid_file.live_address()? {
            if let Some(path) = address.strip_prefix("unix:") {
                return Ok(PathBuf::from(path));
            }
        }
        Err(Error::ServerNotRunning)
    }

    fn spawn_daemon(&self) -> Result<()> {
        let mut command = std::process::Command::new(&self.config.daemon_binary);
        command
            .env("AGENTDB_SOCKET", &self.config.socket_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        command
            .spawn()
            .map_err(|err| Error::Validation(format!("failed to spawn daemon: {err}")))?;
        Ok(())
    }

    async fn poll_until_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.start_timeout;
        loop {
            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(err) => {
                    warn!(%err, "daemon did not become ready");
                    return Err(err);
                }
            }
        }
    }
}

/// Match a response line to its pending request by id.
fn dispatch_response(shared: &ClientShared, line: &str) {
    let response: JsonRpcResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "malformed response line");
            return;
        }
    };
    let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
        return;
    };
    // A request that already timed out has no pending slot; the late
    // response is discarded here.
    let Some(tx) = shared.pending.lock().remove(&id) else {
        return;
    };
    let outcome = match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(Error::Rpc {
            code: error.code,
            message: error.message,
        }),
        (None, None) => Ok(Value::Null),
    };
    let _ = tx.send(outcome);
}
