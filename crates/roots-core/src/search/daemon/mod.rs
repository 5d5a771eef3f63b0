//! Embedding daemon: a long-lived process that keeps one embedder warm and
//! serves short-lived clients over a Unix socket.

mod client;
mod lifecycle;
mod protocol;
mod server;
mod worker;

pub use client::{DEFAULT_CLIENT_TIMEOUT, DaemonEmbedder, EmbedClient};
pub use lifecycle::{
    DaemonLauncher, DaemonPaths, DaemonStatus, StartOutcome, StartPolicy, StopOutcome, StopPolicy,
    daemon_status, start_daemon, stop_daemon,
};
pub use protocol::{
    DaemonRequest, DaemonResponse, MAX_REQUEST_BYTES, MAX_RESPONSE_BYTES, RawRequest,
};
pub use server::{
    DaemonState, EmbedServer, ServerConfig, ServerHandle, ServerOptions, read_pid_file, run_daemon,
};
pub use worker::EmbedWorker;
