//! Starting, stopping and inspecting a detached embedding daemon.
//!
//! The daemon is a separate process launched in its own process group with
//! stdin closed and stdout/stderr appended to a log file. It is found again
//! through three explicit paths: socket, pid file and log file.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::client::EmbedClient;
use super::server::read_pid_file;
use crate::error::ServerError;
use crate::search::ModelRegistry;

/// Timeout for liveness probes, as opposed to embedding calls.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Filesystem locations of one daemon instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonPaths {
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonPaths {
    /// `roots-embedder.{sock,pid,log}` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            socket: dir.join("roots-embedder.sock"),
            pid_file: dir.join("roots-embedder.pid"),
            log_file: dir.join("roots-embedder.log"),
        }
    }
}

impl Default for DaemonPaths {
    fn default() -> Self {
        Self::in_dir(std::env::temp_dir())
    }
}

/// Executable and leading arguments that run a daemon in the foreground.
///
/// The launcher appends `--model`, `--socket`, `--pid-file` and `--log-file`.
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl DaemonLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-launch the running executable as `<exe> server run`.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("server").arg("run"))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, model: &str, paths: &DaemonPaths) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--model")
            .arg(model)
            .arg("--socket")
            .arg(&paths.socket)
            .arg("--pid-file")
            .arg(&paths.pid_file)
            .arg("--log-file")
            .arg(&paths.log_file);
        command
    }
}

/// Readiness polling after launch.
#[derive(Debug, Clone, Copy)]
pub struct StartPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_attempts: 60,
        }
    }
}

/// Exit polling after a `stop` request, before resorting to SIGKILL.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A daemon already serves the requested model.
    AlreadyRunning { pid: Option<u32> },
    Started { pid: u32 },
    /// A daemon serving another model was stopped first.
    Restarted { previous_model: String, pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    /// The daemon ignored `stop` and was killed.
    Killed { pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub model: Option<String>,
    pub pid: Option<u32>,
    pub socket: PathBuf,
}

/// Report whether a daemon answers at `paths.socket` and what it serves.
pub fn daemon_status(paths: &DaemonPaths) -> DaemonStatus {
    let model = EmbedClient::new(&paths.socket)
        .with_timeout(PROBE_TIMEOUT)
        .get_model();
    DaemonStatus {
        running: model.is_some(),
        pid: model.as_ref().and_then(|_| read_pid_file(&paths.pid_file)),
        model,
        socket: paths.socket.clone(),
    }
}

/// Ensure a daemon serving `model` is running, launching one if needed.
///
/// A daemon serving a different model is stopped first; the daemon is
/// single-model for its lifetime. Blocks until the new daemon answers
/// `ping` with the resolved model name or the policy runs out.
pub fn start_daemon(
    paths: &DaemonPaths,
    model: &str,
    launcher: &DaemonLauncher,
    start: StartPolicy,
    stop: StopPolicy,
) -> Result<StartOutcome, ServerError> {
    let wanted = ModelRegistry::builtin().resolve(model).name;
    let probe = EmbedClient::new(&paths.socket).with_timeout(PROBE_TIMEOUT);

    let previous_model = match probe.get_model() {
        Some(running) if running == wanted => {
            debug!(model = %wanted, "Embedding daemon already running");
            return Ok(StartOutcome::AlreadyRunning {
                pid: read_pid_file(&paths.pid_file),
            });
        }
        Some(running) => {
            info!(
                running = %running,
                requested = %wanted,
                "Restarting daemon for a different model"
            );
            stop_daemon(paths, stop)?;
            Some(running)
        }
        None => None,
    };

    let pid = spawn_detached(paths, model, launcher, start, &probe, &wanted)?;
    Ok(match previous_model {
        Some(previous_model) => StartOutcome::Restarted {
            previous_model,
            pid,
        },
        None => StartOutcome::Started { pid },
    })
}

fn spawn_detached(
    paths: &DaemonPaths,
    model: &str,
    launcher: &DaemonLauncher,
    policy: StartPolicy,
    probe: &EmbedClient,
    wanted: &str,
) -> Result<u32, ServerError> {
    if let Some(parent) = paths.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)?;
    let log_err = log.try_clone()?;

    let mut child = launcher
        .command(model, paths)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()
        .map_err(|e| {
            ServerError::StartFailed(format!("cannot launch {}: {e}", launcher.program.display()))
        })?;
    let pid = child.id();
    info!(pid, model = %wanted, socket = %paths.socket.display(), "Launched embedding daemon");

    for attempt in 1..=policy.max_attempts {
        std::thread::sleep(policy.poll_interval);
        if let Some(status) = child.try_wait()? {
            return Err(ServerError::StartFailed(format!(
                "daemon exited with {status} (see {})",
                paths.log_file.display()
            )));
        }
        match probe.ping() {
            Ok(served) if served == wanted => {
                info!(pid, attempt, "Embedding daemon is ready");
                return Ok(pid);
            }
            Ok(served) => {
                debug!(served = %served, wanted, "Socket answered with another model");
            }
            Err(_) => debug!(attempt, "Waiting for embedding daemon"),
        }
    }

    warn!(pid, attempts = policy.max_attempts, "Embedding daemon did not become ready");
    let _ = child.kill();
    let _ = child.wait();
    Err(ServerError::StartTimeout {
        attempts: policy.max_attempts,
        log_file: paths.log_file.display().to_string(),
    })
}

/// Stop the daemon at `paths`, escalating to SIGKILL through the pid file.
pub fn stop_daemon(paths: &DaemonPaths, policy: StopPolicy) -> Result<StopOutcome, ServerError> {
    let client = EmbedClient::new(&paths.socket).with_timeout(PROBE_TIMEOUT);
    if !client.is_running() {
        remove_stale_files(paths);
        return Ok(StopOutcome::NotRunning);
    }

    let pid = read_pid_file(&paths.pid_file);
    if !client.stop() {
        debug!("Stop request was not acknowledged");
    }
    for _ in 0..policy.max_attempts {
        std::thread::sleep(policy.poll_interval);
        if !client.is_running() {
            info!(socket = %paths.socket.display(), "Embedding daemon stopped");
            return Ok(StopOutcome::Stopped);
        }
    }

    let Some(pid) = pid else {
        return Err(ServerError::StopFailed(format!(
            "daemon at {} ignored stop and {} has no pid",
            paths.socket.display(),
            paths.pid_file.display()
        )));
    };
    warn!(pid, "Embedding daemon ignored stop, killing it");
    kill_process(pid).map_err(ServerError::StopFailed)?;
    remove_stale_files(paths);
    Ok(StopOutcome::Killed { pid })
}

fn remove_stale_files(paths: &DaemonPaths) {
    let is_socket = std::fs::symlink_metadata(&paths.socket)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false);
    if is_socket {
        if let Err(err) = std::fs::remove_file(&paths.socket) {
            debug!(error = %err, "Failed to remove stale daemon socket");
        }
    }
    if paths.pid_file.exists() {
        if let Err(err) = std::fs::remove_file(&paths.pid_file) {
            debug!(error = %err, "Failed to remove stale pid file");
        }
    }
}

/// Send SIGKILL to a process.
fn kill_process(pid: u32) -> Result<(), String> {
    let output = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .output()
        .map_err(|e| format!("kill command failed: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Already gone counts as killed.
        if stderr.contains("No such process") {
            Ok(())
        } else {
            Err(stderr.trim().to_string())
        }
    }
}
