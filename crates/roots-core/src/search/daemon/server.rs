//! Embedding daemon server.
//!
//! Lifecycle: `Stopped -> Starting -> Ready -> ShuttingDown -> Stopped`.
//! [`EmbedServer::start`] warms the embedder up, binds the socket and
//! records the pid; [`EmbedServer::run`] serves until a `stop` request, a
//! signal, or displacement by another daemon binding the same path.

use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::lifecycle::DaemonPaths;
use super::protocol::{DaemonResponse, MAX_REQUEST_BYTES};
use super::worker::EmbedWorker;
use crate::error::ServerError;
use crate::search::{Embedder, ModelRegistry, SelectOptions, select_embedder};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 64 * 1024;
const WARMUP_TEXT: &str = "warmup";

/// Observable daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Ready,
    ShuttingDown,
}

impl DaemonState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::ShuttingDown => 3,
        }
    }
}

/// Cloneable handle for observing and stopping a server from elsewhere.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl ServerHandle {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(DaemonState::Stopped.as_u8())),
        }
    }

    pub fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ask the accept loop to exit at its next poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: DaemonState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Where and as what a server is reachable.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub pid_file: Option<PathBuf>,
    /// Identifier reported by `ping`.
    pub model: String,
}

/// Embedding server that owns one embedder for its whole lifetime.
pub struct EmbedServer {
    config: ServerConfig,
    embedder: Arc<dyn Embedder>,
    worker: Arc<EmbedWorker>,
    handle: ServerHandle,
    listener: Option<UnixListener>,
    socket_identity: Option<(u64, u64)>,
}

impl EmbedServer {
    pub fn new(config: ServerConfig, embedder: Arc<dyn Embedder>) -> Self {
        let handle = ServerHandle::new();
        let worker = Arc::new(EmbedWorker::new(
            Arc::clone(&embedder),
            config.model.clone(),
            Arc::clone(&handle.shutdown),
        ));
        Self {
            config,
            embedder,
            worker,
            handle,
            listener: None,
            socket_identity: None,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> DaemonState {
        self.handle.state()
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Requests answered so far.
    pub fn processed(&self) -> u64 {
        self.worker.processed()
    }

    /// Warm up, bind and record the pid. The server is `Ready` on success
    /// and `Stopped` on failure.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.handle.set_state(DaemonState::Starting);
        match self.start_inner().await {
            Ok(()) => {
                self.handle.set_state(DaemonState::Ready);
                info!(
                    socket = %self.config.socket_path.display(),
                    model = %self.config.model,
                    pid = std::process::id(),
                    "Embedding daemon ready"
                );
                Ok(())
            }
            Err(err) => {
                self.cleanup();
                Err(err)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<(), ServerError> {
        let started = std::time::Instant::now();
        let embedder = Arc::clone(&self.embedder);
        tokio::task::spawn_blocking(move || embedder.embed(WARMUP_TEXT))
            .await
            .map_err(|e| ServerError::StartFailed(format!("warm-up task failed: {e}")))?
            .map_err(|e| ServerError::StartFailed(format!("warm-up embedding failed: {e}")))?;
        debug!(
            model = %self.config.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Embedder warmed up"
        );

        let socket_path = &self.config.socket_path;
        if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        displace_stale_socket(socket_path)?;

        let listener = UnixListener::bind(socket_path).map_err(|source| ServerError::Bind {
            socket: socket_path.display().to_string(),
            source,
        })?;
        self.socket_identity = file_identity(socket_path);
        self.listener = Some(listener);

        if let Some(pid_file) = &self.config.pid_file {
            write_pid_file(pid_file)?;
        }
        Ok(())
    }

    /// Serve until shutdown, then remove the socket and pid file.
    pub async fn run(mut self) -> Result<(), ServerError> {
        if self.listener.is_none() {
            self.start().await?;
        }
        let Some(listener) = self.listener.take() else {
            return Err(ServerError::NotRunning);
        };

        let mut connections = JoinSet::new();
        loop {
            if self.handle.is_shutdown_requested() {
                break;
            }
            while connections.try_join_next().is_some() {}

            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, _addr))) => {
                    let worker = Arc::clone(&self.worker);
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(stream, worker).await {
                            debug!(error = %err, "Daemon connection closed with error");
                        }
                    });
                }
                Ok(Err(err)) => {
                    warn!(
                        error = %err,
                        socket = %self.config.socket_path.display(),
                        "Daemon accept failed"
                    );
                }
                Err(_) => {
                    if self.was_displaced() {
                        warn!(
                            socket = %self.config.socket_path.display(),
                            "Socket was taken over by another daemon, shutting down"
                        );
                        break;
                    }
                }
            }
        }

        self.handle.set_state(DaemonState::ShuttingDown);
        info!(
            processed = self.worker.processed(),
            "Embedding daemon shutting down"
        );
        drop(listener);
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Abandoning in-flight daemon connections"
            );
            connections.shutdown().await;
        }
        self.cleanup();
        Ok(())
    }

    fn was_displaced(&self) -> bool {
        match self.socket_identity {
            Some(identity) => file_identity(&self.config.socket_path) != Some(identity),
            None => false,
        }
    }

    /// Remove the files this server created. Files now owned by another
    /// daemon are left alone.
    fn cleanup(&mut self) {
        self.listener = None;
        if let Some(identity) = self.socket_identity.take() {
            if file_identity(&self.config.socket_path) == Some(identity) {
                remove_if_present(&self.config.socket_path);
            }
        }
        if let Some(pid_file) = &self.config.pid_file {
            if read_pid_file(pid_file) == Some(std::process::id()) {
                remove_if_present(pid_file);
            }
        }
        self.handle.set_state(DaemonState::Stopped);
    }
}

impl Drop for EmbedServer {
    fn drop(&mut self) {
        if self.handle.state() != DaemonState::Stopped {
            self.cleanup();
        }
    }
}

async fn handle_connection(mut stream: UnixStream, worker: Arc<EmbedWorker>) -> io::Result<()> {
    let response = match read_request(&mut stream).await? {
        Ok(body) => {
            let worker = Arc::clone(&worker);
            tokio::task::spawn_blocking(move || worker.handle_bytes(&body))
                .await
                .unwrap_or_else(|e| DaemonResponse::failure(format!("request handler failed: {e}")))
        }
        Err(message) => DaemonResponse::failure(message),
    };
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

/// Read one request body: up to EOF, or until the bytes form a complete
/// JSON object. The inner error is a wire-ready failure message.
async fn read_request(stream: &mut UnixStream) -> io::Result<Result<Vec<u8>, String>> {
    let mut body = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
        if body.len() > MAX_REQUEST_BYTES {
            return Ok(Err(format!(
                "invalid request: exceeds {MAX_REQUEST_BYTES} bytes"
            )));
        }
        if looks_complete(&body) {
            break;
        }
    }
    Ok(Ok(body))
}

fn looks_complete(body: &[u8]) -> bool {
    let ends_with_brace = body
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'}');
    ends_with_brace && serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok()
}

/// Clear the bind path. A leftover socket is removed, displacing whichever
/// daemon owned it; anything else at that path is an error.
fn displace_stale_socket(socket_path: &Path) -> Result<(), ServerError> {
    let metadata = match std::fs::symlink_metadata(socket_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(ServerError::Io(err)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ServerError::SocketOccupied(
            socket_path.display().to_string(),
        ));
    }
    std::fs::remove_file(socket_path)?;
    debug!(socket = %socket_path.display(), "Removed existing daemon socket");
    Ok(())
}

fn file_identity(path: &Path) -> Option<(u64, u64)> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|m| (m.dev(), m.ino()))
}

fn write_pid_file(path: &Path) -> Result<(), ServerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}

/// Parse the pid recorded at `path`.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_if_present(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            debug!(error = %err, path = %path.display(), "Failed to remove daemon file");
        }
    }
}

/// Options for [`run_daemon`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Model alias or name to serve.
    pub model: String,
    pub paths: DaemonPaths,
    pub cache_dir: Option<PathBuf>,
}

/// Blocking foreground entry point: select the model strictly, start,
/// serve until stopped or signalled.
pub fn run_daemon(options: ServerOptions) -> Result<(), ServerError> {
    let resolved = ModelRegistry::builtin().resolve(&options.model);
    let selection = select_embedder(
        &resolved,
        &SelectOptions {
            strict: true,
            cache_dir: options.cache_dir.clone(),
        },
    )
    .map_err(|e| ServerError::StartFailed(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let config = ServerConfig {
            socket_path: options.paths.socket.clone(),
            pid_file: Some(options.paths.pid_file.clone()),
            model: resolved.name.clone(),
        };
        let mut server = EmbedServer::new(config, Arc::new(selection.backend));
        server.start().await?;
        install_signal_handlers(server.handle())?;
        server.run().await
    })
}

fn install_signal_handlers(handle: ServerHandle) -> Result<(), ServerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => info!(signal = "SIGTERM", "Received shutdown signal"),
            _ = interrupt.recv() => info!(signal = "SIGINT", "Received shutdown signal"),
        }
        handle.shutdown();
    });
    Ok(())
}
