//! Embedding daemon client.
//!
//! Fully synchronous. Every call opens a fresh connection, writes one
//! request, half-closes, reads the response to EOF and disconnects.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use super::protocol::{DaemonRequest, DaemonResponse, MAX_RESPONSE_BYTES};
use crate::error::ServerError;
use crate::search::{EmbedError, Embedder, EmbedderInfo, EmbedderTier, HashEmbedder};

/// Read timeout for embedding calls.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for communicating with the embedding daemon.
#[derive(Debug, Clone)]
pub struct EmbedClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl EmbedClient {
    /// Create a new client connecting to the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Set the per-call read and write timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One raw round trip. Failure-tagged responses are returned as-is.
    pub fn request(&self, request: &DaemonRequest) -> Result<DaemonResponse, ServerError> {
        let mut stream =
            UnixStream::connect(&self.socket_path).map_err(|source| ServerError::Connect {
                socket: self.socket_path.display().to_string(),
                source,
            })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        stream.write_all(&request.to_bytes())?;
        stream.shutdown(Shutdown::Write)?;

        let mut body = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_BYTES as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() > MAX_RESPONSE_BYTES {
            return Err(ServerError::Protocol(format!(
                "response exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }
        serde_json::from_slice(&body).map_err(|e| ServerError::Protocol(e.to_string()))
    }

    fn checked(&self, request: &DaemonRequest) -> Result<DaemonResponse, ServerError> {
        let response = self.request(request)?;
        if response.ok {
            Ok(response)
        } else {
            Err(ServerError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "unspecified daemon error".to_string()),
            ))
        }
    }

    /// Model served by the daemon.
    pub fn ping(&self) -> Result<String, ServerError> {
        self.checked(&DaemonRequest::Ping)?
            .model
            .ok_or_else(|| ServerError::Protocol("ping response has no model".to_string()))
    }

    /// Any connection or protocol failure counts as not running.
    pub fn is_running(&self) -> bool {
        self.ping().is_ok()
    }

    pub fn get_model(&self) -> Option<String> {
        self.ping().ok()
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, ServerError> {
        self.checked(&DaemonRequest::Embed {
            text: text.to_string(),
        })?
        .embedding
        .ok_or_else(|| ServerError::Protocol("embed response has no embedding".to_string()))
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ServerError> {
        let vectors = self
            .checked(&DaemonRequest::EmbedBatch {
                texts: texts.iter().map(|t| (*t).to_string()).collect(),
            })?
            .embeddings
            .ok_or_else(|| {
                ServerError::Protocol("embed_batch response has no embeddings".to_string())
            })?;
        if vectors.len() != texts.len() {
            return Err(ServerError::Protocol(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Ask the daemon to exit. Best effort.
    pub fn stop(&self) -> bool {
        self.checked(&DaemonRequest::Stop).is_ok()
    }
}

/// Embedder that delegates to a running daemon and degrades to hashing
/// whenever the daemon cannot answer. Fallback vectors have the dimension
/// the daemon reported at connect time.
#[derive(Debug)]
pub struct DaemonEmbedder {
    client: EmbedClient,
    model: String,
    dimension: usize,
    fallback: HashEmbedder,
}

impl DaemonEmbedder {
    /// Connect to a daemon that must be serving `expected_model`.
    pub fn connect(client: EmbedClient, expected_model: &str) -> Result<Self, ServerError> {
        let model = client.ping()?;
        if model != expected_model {
            return Err(ServerError::Remote(format!(
                "daemon serves {model}, expected {expected_model}"
            )));
        }
        let dimension = client.embed("dimension probe")?.len();
        if dimension == 0 {
            return Err(ServerError::Protocol(
                "daemon returned an empty embedding".to_string(),
            ));
        }
        Ok(Self {
            client,
            model,
            dimension,
            fallback: HashEmbedder::new(dimension),
        })
    }

    pub fn client(&self) -> &EmbedClient {
        &self.client
    }
}

impl Embedder for DaemonEmbedder {
    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            name: self.model.clone(),
            dimension: self.dimension,
            tier: EmbedderTier::Model,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        match self.client.embed(text) {
            Ok(vector) => Ok(vector),
            Err(err) => {
                warn!(
                    error = %err,
                    model = %self.model,
                    fallback = "lite",
                    "Embedding daemon unavailable, using hashing embedder"
                );
                self.fallback.embed(text)
            }
        }
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self.client.embed_batch(texts) {
            Ok(vectors) => Ok(vectors),
            Err(err) => {
                warn!(
                    error = %err,
                    model = %self.model,
                    fallback = "lite",
                    count = texts.len(),
                    "Embedding daemon unavailable, using hashing embedder"
                );
                self.fallback.embed_batch(texts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_socket_is_not_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = EmbedClient::new(dir.path().join("absent.sock"));
        assert!(!client.is_running());
        assert_eq!(client.get_model(), None);
        assert!(!client.stop());
        match client.embed("x") {
            Err(ServerError::Connect { socket, .. }) => assert!(socket.ends_with("absent.sock")),
            other => panic!("expected Connect error, got {other:?}"),
        }
    }

    #[test]
    fn timeout_builder() {
        let client = EmbedClient::new("/tmp/x.sock").with_timeout(Duration::from_secs(3));
        assert_eq!(client.timeout(), Duration::from_secs(3));
        assert_eq!(client.socket_path(), Path::new("/tmp/x.sock"));
        assert_eq!(
            EmbedClient::new("/tmp/y.sock").timeout(),
            DEFAULT_CLIENT_TIMEOUT
        );
    }

    #[test]
    fn garbage_response_is_protocol_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            stream.read_to_end(&mut request).expect("read");
            stream.write_all(b"not json").expect("write");
            request
        });

        let client = EmbedClient::new(&path).with_timeout(Duration::from_secs(5));
        assert!(matches!(client.ping(), Err(ServerError::Protocol(_))));
        let request = server.join().expect("join");
        assert_eq!(request, br#"{"cmd":"ping"}"#.to_vec());
    }

    #[test]
    fn failure_tag_is_remote_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).expect("bind");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            stream.read_to_end(&mut request).expect("read");
            stream
                .write_all(br#"{"ok":false,"error":"model exploded"}"#)
                .expect("write");
        });

        let client = EmbedClient::new(&path).with_timeout(Duration::from_secs(5));
        match client.embed("x") {
            Err(ServerError::Remote(message)) => assert_eq!(message, "model exploded"),
            other => panic!("expected Remote error, got {other:?}"),
        }
        server.join().expect("join");
    }
}
