//! Core embedding trait and types.
use std::fmt;

use crate::error::ServerError;

#[derive(Debug)]
pub enum EmbedError {
    /// The requested model-backed embedder could not be constructed or loaded.
    ModelUnavailable { model: String, reason: String },
    InferenceFailed(String),
    DimensionMismatch { expected: usize, actual: usize },
    /// The embedding daemon could not be reached or reported a failure.
    Server(ServerError),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelUnavailable { model, reason } => {
                write!(f, "model unavailable: {model}: {reason}")
            }
            Self::InferenceFailed(e) => write!(f, "inference failed: {e}"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {expected}, got {actual}")
            }
            Self::Server(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServerError> for EmbedError {
    fn from(e: ServerError) -> Self {
        Self::Server(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedderTier {
    /// Feature hashing, no model.
    Hash,
    /// Pretrained sentence-embedding model.
    Model,
}

impl fmt::Display for EmbedderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => write!(f, "hash"),
            Self::Model => write!(f, "model"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderInfo {
    pub name: String,
    pub dimension: usize,
    pub tier: EmbedderTier,
}

pub trait Embedder: Send + Sync {
    fn info(&self) -> EmbedderInfo;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimension(&self) -> usize {
        self.info().dimension
    }
    fn tier(&self) -> EmbedderTier {
        self.info().tier
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn info(&self) -> EmbedderInfo {
        (**self).info()
    }
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(text)
    }
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed_batch(texts)
    }
}

/// Cosine similarity computed in f64.
///
/// Returns 0.0 when either vector has zero norm, the lengths differ, or a
/// component is not finite.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if norm_a == 0.0 || norm_b == 0.0 || !score.is_finite() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0)
}
