//! Request dispatch against the daemon's loaded embedder.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

use super::protocol::{DaemonRequest, DaemonResponse};
use crate::search::Embedder;

/// Shared handler for every connection the daemon accepts.
///
/// The embedder is only read, so concurrent connections share it freely.
pub struct EmbedWorker {
    embedder: Arc<dyn Embedder>,
    model: String,
    processed: AtomicU64,
    shutdown: Arc<AtomicBool>,
}

impl EmbedWorker {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: impl Into<String>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            embedder,
            model: model.into(),
            processed: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Model identifier reported by `ping`.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the number of processed requests.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Decode and answer one request body. Never fails: every error becomes
    /// a failure response.
    pub fn handle_bytes(&self, body: &[u8]) -> DaemonResponse {
        match DaemonRequest::parse(body) {
            Ok(request) => self.handle(request),
            Err(message) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                debug!(error = %message, "Rejected daemon request");
                DaemonResponse::failure(message)
            }
        }
    }

    pub fn handle(&self, request: DaemonRequest) -> DaemonResponse {
        let started = Instant::now();
        let cmd = request.command();
        let response = match request {
            DaemonRequest::Ping => DaemonResponse::pong(self.model.clone()),
            DaemonRequest::Stop => {
                self.shutdown.store(true, Ordering::SeqCst);
                DaemonResponse::stopping()
            }
            DaemonRequest::Embed { text } => match self.embedder.embed(&text) {
                Ok(vector) => DaemonResponse::embedding(vector),
                Err(err) => DaemonResponse::failure(err.to_string()),
            },
            DaemonRequest::EmbedBatch { texts } => {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                match self.embedder.embed_batch(&refs) {
                    Ok(vectors) => DaemonResponse::embeddings(vectors),
                    Err(err) => DaemonResponse::failure(err.to_string()),
                }
            }
        };
        self.processed.fetch_add(1, Ordering::Relaxed);
        debug!(
            cmd,
            ok = response.ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Handled daemon request"
        );
        response
    }
}
