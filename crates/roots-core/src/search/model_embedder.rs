//! Model-backed sentence embeddings via fastembed (ONNX Runtime).
//!
//! Construction is cheap and performs no I/O. The model is loaded on the
//! first embedding call and kept for the embedder's lifetime. Without the
//! `semantic-search` feature construction always fails with
//! [`EmbedError::ModelUnavailable`].

use std::fmt;
use std::path::PathBuf;
#[cfg(feature = "semantic-search")]
use std::sync::Mutex;

use super::embedder::{EmbedError, Embedder, EmbedderInfo, EmbedderTier};

/// Model names the runtime knows how to load, with their output dimension.
const KNOWN_MODELS: &[(&str, usize)] = &[
    ("sentence-transformers/all-MiniLM-L6-v2", 384),
    ("BAAI/bge-small-en-v1.5", 384),
    ("BAAI/bge-base-en-v1.5", 768),
    ("BAAI/bge-large-en-v1.5", 1024),
    ("nomic-ai/nomic-embed-text-v1.5", 768),
];

fn known_dimension(name: &str) -> Option<(&'static str, usize)> {
    KNOWN_MODELS
        .iter()
        .copied()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
}

#[cfg(feature = "semantic-search")]
fn runtime_model(canonical: &str) -> Option<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;
    match canonical {
        "sentence-transformers/all-MiniLM-L6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "BAAI/bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        "BAAI/bge-large-en-v1.5" => Some(EmbeddingModel::BGELargeENV15),
        "nomic-ai/nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
        _ => None,
    }
}

/// Embedder backed by a pretrained sentence-embedding model.
pub struct ModelEmbedder {
    model_name: String,
    dimension: usize,
    cache_dir: Option<PathBuf>,
    #[cfg(feature = "semantic-search")]
    runtime_model: fastembed::EmbeddingModel,
    #[cfg(feature = "semantic-search")]
    loaded: Mutex<Option<fastembed::TextEmbedding>>,
}

impl fmt::Debug for ModelEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEmbedder")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelEmbedder {
    /// Prepare an embedder for `model_name` without loading it.
    pub fn try_new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self, EmbedError> {
        let Some((canonical, dimension)) = known_dimension(model_name) else {
            return Err(EmbedError::ModelUnavailable {
                model: model_name.to_string(),
                reason: "model is not supported by the embedding runtime".to_string(),
            });
        };
        Self::build(canonical, dimension, cache_dir)
    }

    #[cfg(feature = "semantic-search")]
    fn build(
        canonical: &str,
        dimension: usize,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self, EmbedError> {
        let runtime_model = runtime_model(canonical).ok_or_else(|| EmbedError::ModelUnavailable {
            model: canonical.to_string(),
            reason: "no runtime mapping".to_string(),
        })?;
        Ok(Self {
            model_name: canonical.to_string(),
            dimension,
            cache_dir,
            runtime_model,
            loaded: Mutex::new(None),
        })
    }

    #[cfg(not(feature = "semantic-search"))]
    fn build(
        canonical: &str,
        _dimension: usize,
        _cache_dir: Option<PathBuf>,
    ) -> Result<Self, EmbedError> {
        Err(EmbedError::ModelUnavailable {
            model: canonical.to_string(),
            reason: "built without the semantic-search feature".to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Whether the model has been loaded into memory.
    #[cfg(feature = "semantic-search")]
    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    #[cfg(not(feature = "semantic-search"))]
    pub fn is_loaded(&self) -> bool {
        false
    }

    #[cfg(feature = "semantic-search")]
    fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        use fastembed::{InitOptions, TextEmbedding};

        let mut guard = self
            .loaded
            .lock()
            .map_err(|_| EmbedError::InferenceFailed("model lock poisoned".to_string()))?;

        if guard.is_none() {
            let started = std::time::Instant::now();
            tracing::info!(model = %self.model_name, "Loading embedding model");
            let mut options =
                InitOptions::new(self.runtime_model.clone()).with_show_download_progress(false);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            let model =
                TextEmbedding::try_new(options).map_err(|e| EmbedError::ModelUnavailable {
                    model: self.model_name.clone(),
                    reason: e.to_string(),
                })?;
            tracing::info!(
                model = %self.model_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Embedding model loaded"
            );
            *guard = Some(model);
        }

        let Some(model) = guard.as_mut() else {
            return Err(EmbedError::InferenceFailed("model not loaded".to_string()));
        };
        let mut vectors = model
            .embed(texts, None)
            .map_err(|e| EmbedError::InferenceFailed(e.to_string()))?;
        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            super::hash_embedder::l2_normalize(vector);
        }
        Ok(vectors)
    }

    #[cfg(not(feature = "semantic-search"))]
    fn run(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::ModelUnavailable {
            model: self.model_name.clone(),
            reason: "built without the semantic-search feature".to_string(),
        })
    }
}

impl Embedder for ModelEmbedder {
    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            name: self.model_name.clone(),
            dimension: self.dimension,
            tier: EmbedderTier::Model,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.run(vec![text.to_string()])?
            .pop()
            .ok_or_else(|| EmbedError::InferenceFailed("model returned no vectors".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.iter().map(|t| (*t).to_string()).collect())
    }
}
