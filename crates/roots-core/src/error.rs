//! Error types for roots-core

use std::fmt::Write;
use thiserror::Error;

use crate::codec::CodecError;
use crate::knowledge::KnowledgeError;
use crate::search::EmbedError;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for roots-core
#[derive(Error, Debug)]
pub enum Error {
    /// Index store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Embedding serialization errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Embedder construction or inference errors
    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Embedding daemon errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Knowledge file layer errors
    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Storage(err) => Some(err.remediation()),
            Self::Codec(_) => Some(
                Remediation::new("A stored embedding is corrupt. Rebuild the index.")
                    .command("Rebuild index", "roots reindex"),
            ),
            Self::Embed(EmbedError::ModelUnavailable { .. }) => Some(
                Remediation::new("The configured model could not be loaded.")
                    .command("Use the hashing embedder", "roots config model lite")
                    .alternative(
                        "Build with --features semantic-search for model-backed embeddings.",
                    ),
            ),
            Self::Embed(_) => None,
            Self::Server(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Knowledge(_) => Some(
                Remediation::new("Check the knowledge tree layout.")
                    .command("Show tree", "roots tree"),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the .roots directory exists and is writable."),
            ),
            Self::Json(_) => None,
        }
    }
}

/// Index store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt embedding: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Database(_) | Self::Io(_) => Remediation::new(
                "Index operation failed. Check disk space and permissions on the .roots directory.",
            )
            .alternative("Delete .roots/_index.db and run `roots reindex` to rebuild it."),
            Self::Codec(_) | Self::InvalidValue(_) => {
                Remediation::new("The index contains malformed rows. Rebuild it.")
                    .command("Rebuild index", "roots reindex")
            }
        }
    }
}

/// Embedding daemon errors, on either side of the socket
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("cannot reach embedding daemon at {socket}: {source}")]
    Connect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed daemon message: {0}")]
    Protocol(String),

    #[error("daemon returned an error: {0}")]
    Remote(String),

    #[error("embedding daemon is not running")]
    NotRunning,

    #[error("cannot bind daemon socket {socket}: {source}")]
    Bind {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path exists and is not a socket: {0}")]
    SocketOccupied(String),

    #[error("daemon did not become ready after {attempts} attempts (see {log_file})")]
    StartTimeout { attempts: u32, log_file: String },

    #[error("daemon failed to start: {0}")]
    StartFailed(String),

    #[error("daemon failed to stop: {0}")]
    StopFailed(String),
}

impl ServerError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Connect { .. } | Self::NotRunning => {
                Remediation::new("Start the embedding daemon, or rely on the hashing fallback.")
                    .command("Start daemon", "roots server start")
                    .command("Check status", "roots server status")
            }
            Self::Io(_) | Self::Protocol(_) | Self::Remote(_) => {
                Remediation::new("The daemon misbehaved. Restart it.")
                    .command("Restart daemon", "roots server restart")
            }
            Self::Bind { socket, .. } => {
                Remediation::new(format!("Check that the directory holding {socket} is writable."))
                    .command("Stop any running daemon", "roots server stop")
            }
            Self::SocketOccupied(path) => {
                Remediation::new(format!("Remove or move the file at {path}, then retry."))
            }
            Self::StartTimeout { log_file, .. } => {
                Remediation::new("Model loading took too long or crashed.")
                    .command("Inspect daemon log", format!("tail -n 50 {log_file}"))
                    .alternative("Raise daemon.start_max_attempts for large models.")
            }
            Self::StartFailed(_) => Remediation::new("The daemon exited during startup.")
                .command("Run in foreground", "roots server start --foreground"),
            Self::StopFailed(_) => Remediation::new("The daemon could not be stopped.")
                .command("Find the process", "pgrep -f 'roots server run'")
                .alternative(
                    "Kill it manually, then run `roots server stop` to clear stale files.",
                ),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config {0}: {1}")]
    ParseFailed(String, String),

    #[error("Failed to write config file {0}: {1}")]
    WriteFailed(String, String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed(path, _) | Self::WriteFailed(path, _) => {
                Remediation::new(format!("Check permissions on {path}."))
            }
            Self::ParseFailed(path, _) => {
                Remediation::new(format!("Fix the TOML syntax in {path}."))
                    .command("Show effective config", "roots config show")
                    .alternative("Delete the file to fall back to defaults.")
            }
        }
    }
}
