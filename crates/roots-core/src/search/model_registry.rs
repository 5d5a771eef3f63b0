//! Model registry: suggested embedding models and alias resolution.
//!
//! Any model name may be used; the registry only supplies short aliases and
//! metadata for well-known ones.

use std::collections::HashMap;

use serde::Serialize;

use super::hash_embedder::DEFAULT_HASH_DIMENSION;

/// Alias used when no model is configured.
pub const DEFAULT_MODEL: &str = "bge-base";

/// Alias for the hashing embedder.
pub const HASH_MODEL: &str = "lite";

/// Which embedder family a model needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Hash,
    Model,
}

/// Information about a registered model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub alias: String,
    pub name: String,
    pub kind: ModelKind,
    pub dimension: usize,
    pub size_hint: String,
    pub description: String,
}

/// A user-supplied model identifier after alias resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub name: String,
    pub kind: ModelKind,
}

impl ResolvedModel {
    #[must_use]
    pub fn hash() -> Self {
        Self {
            name: HASH_MODEL.to_string(),
            kind: ModelKind::Hash,
        }
    }
}

/// Registry of suggested models keyed by alias.
pub struct ModelRegistry {
    models: HashMap<String, ModelInfo>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Registry preloaded with the suggested models.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let entries: [(&str, &str, ModelKind, usize, &str, &str); 6] = [
            (
                HASH_MODEL,
                HASH_MODEL,
                ModelKind::Hash,
                DEFAULT_HASH_DIMENSION,
                "0MB",
                "N-gram hashing, no dependencies, instant startup",
            ),
            (
                "minilm",
                "sentence-transformers/all-MiniLM-L6-v2",
                ModelKind::Model,
                384,
                "90MB",
                "Fast, lightweight sentence embeddings",
            ),
            (
                "bge-small",
                "BAAI/bge-small-en-v1.5",
                ModelKind::Model,
                384,
                "130MB",
                "Small BGE model, good quality",
            ),
            (
                DEFAULT_MODEL,
                "BAAI/bge-base-en-v1.5",
                ModelKind::Model,
                768,
                "440MB",
                "Balanced quality and speed (default)",
            ),
            (
                "bge-large",
                "BAAI/bge-large-en-v1.5",
                ModelKind::Model,
                1024,
                "1.3GB",
                "Large BGE model, higher quality",
            ),
            (
                "nomic",
                "nomic-ai/nomic-embed-text-v1.5",
                ModelKind::Model,
                768,
                "550MB",
                "Long-context general-purpose embeddings",
            ),
        ];
        for (alias, name, kind, dimension, size_hint, description) in entries {
            registry.register(ModelInfo {
                alias: alias.to_string(),
                name: name.to_string(),
                kind,
                dimension,
                size_hint: size_hint.to_string(),
                description: description.to_string(),
            });
        }
        registry
    }

    /// Register a model in the registry.
    pub fn register(&mut self, info: ModelInfo) {
        self.models.insert(info.alias.clone(), info);
    }

    /// Look up a model by alias.
    pub fn get(&self, alias: &str) -> Option<&ModelInfo> {
        self.models.get(alias)
    }

    /// Look up a model by alias or full name.
    pub fn find(&self, input: &str) -> Option<&ModelInfo> {
        self.get(input).or_else(|| {
            self.models
                .values()
                .find(|m| m.name.eq_ignore_ascii_case(input))
        })
    }

    /// All registered models, sorted by dimension then alias.
    pub fn list(&self) -> Vec<&ModelInfo> {
        let mut models: Vec<&ModelInfo> = self.models.values().collect();
        models.sort_by(|a, b| {
            a.dimension
                .cmp(&b.dimension)
                .then_with(|| a.alias.cmp(&b.alias))
        });
        models
    }

    /// Resolve an alias or raw model name. Unknown names are taken as raw
    /// model-backed names.
    pub fn resolve(&self, input: &str) -> ResolvedModel {
        let input = input.trim();
        if let Some(info) = self.get(input) {
            return ResolvedModel {
                name: info.name.clone(),
                kind: info.kind,
            };
        }
        ResolvedModel {
            name: input.to_string(),
            kind: ModelKind::Model,
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
