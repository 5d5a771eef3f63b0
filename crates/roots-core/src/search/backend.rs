//! Embedder selection.
//!
//! [`EmbedderBackend`] is the closed set of in-process embedders. Selection
//! resolves a model to a backend and falls back to hashing when the model
//! runtime cannot provide it, unless the caller asked for strict selection.

use std::path::PathBuf;

use tracing::warn;

use super::embedder::{EmbedError, Embedder, EmbedderInfo};
use super::hash_embedder::HashEmbedder;
use super::model_embedder::ModelEmbedder;
use super::model_registry::{ModelKind, ResolvedModel};

/// An in-process embedder.
#[derive(Debug)]
pub enum EmbedderBackend {
    Hash(HashEmbedder),
    Model(ModelEmbedder),
}

impl Embedder for EmbedderBackend {
    fn info(&self) -> EmbedderInfo {
        match self {
            Self::Hash(e) => e.info(),
            Self::Model(e) => e.info(),
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        match self {
            Self::Hash(e) => e.embed(text),
            Self::Model(e) => e.embed(text),
        }
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        match self {
            Self::Hash(e) => e.embed_batch(texts),
            Self::Model(e) => e.embed_batch(texts),
        }
    }
}

/// Options for [`select_embedder`].
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Fail instead of falling back to hashing.
    pub strict: bool,
    /// Where model files are cached.
    pub cache_dir: Option<PathBuf>,
}

/// Outcome of embedder selection.
#[derive(Debug)]
pub struct EmbedderSelection {
    pub backend: EmbedderBackend,
    /// Model name that was asked for.
    pub requested: String,
    /// Why the hashing embedder is serving instead, if it is.
    pub fell_back: Option<String>,
}

impl EmbedderSelection {
    /// Model identifier the backend actually serves.
    pub fn serving_model(&self) -> &str {
        if self.fell_back.is_some() {
            super::model_registry::HASH_MODEL
        } else {
            &self.requested
        }
    }
}

/// Build the embedder for `model`.
pub fn select_embedder(
    model: &ResolvedModel,
    options: &SelectOptions,
) -> Result<EmbedderSelection, EmbedError> {
    if model.kind == ModelKind::Hash {
        return Ok(EmbedderSelection {
            backend: EmbedderBackend::Hash(HashEmbedder::default()),
            requested: model.name.clone(),
            fell_back: None,
        });
    }

    match ModelEmbedder::try_new(&model.name, options.cache_dir.clone()) {
        Ok(embedder) => Ok(EmbedderSelection {
            backend: EmbedderBackend::Model(embedder),
            requested: model.name.clone(),
            fell_back: None,
        }),
        Err(err) if options.strict => Err(err),
        Err(err) => {
            let reason = err.to_string();
            warn!(
                requested = %model.name,
                fallback = "lite",
                reason = %reason,
                "Model embedder unavailable, using hashing embedder"
            );
            Ok(EmbedderSelection {
                backend: EmbedderBackend::Hash(HashEmbedder::default()),
                requested: model.name.clone(),
                fell_back: Some(reason),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::EmbedderTier;

    #[test]
    fn hash_model_selects_hash() {
        let sel = select_embedder(&ResolvedModel::hash(), &SelectOptions::default()).unwrap();
        assert!(matches!(sel.backend, EmbedderBackend::Hash(_)));
        assert!(sel.fell_back.is_none());
        assert_eq!(sel.serving_model(), "lite");
    }

    #[test]
    fn unknown_model_falls_back_with_reason() {
        let model = ResolvedModel {
            name: "nobody/nothing".into(),
            kind: ModelKind::Model,
        };
        let sel = select_embedder(&model, &SelectOptions::default()).unwrap();
        assert_eq!(sel.backend.tier(), EmbedderTier::Hash);
        assert_eq!(sel.requested, "nobody/nothing");
        assert!(sel.fell_back.is_some());
        assert_eq!(sel.serving_model(), "lite");
    }

    #[test]
    fn strict_selection_refuses_fallback() {
        let model = ResolvedModel {
            name: "nobody/nothing".into(),
            kind: ModelKind::Model,
        };
        let options = SelectOptions {
            strict: true,
            ..SelectOptions::default()
        };
        let err = select_embedder(&model, &options).unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable { .. }));
    }

    #[test]
    fn backend_delegates() {
        let backend = EmbedderBackend::Hash(HashEmbedder::new(16));
        assert_eq!(backend.dimension(), 16);
        assert_eq!(backend.embed_batch(&["a", "b"]).unwrap().len(), 2);
    }
}
