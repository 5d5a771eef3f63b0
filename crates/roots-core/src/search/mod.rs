//! Embedding and semantic search for roots
//!
//! Two embedder tiers share one [`Embedder`] trait: a deterministic hashing
//! embedder that always works, and model-backed embedding through fastembed
//! (feature `semantic-search`). The [`daemon`] module keeps a model warm in a
//! separate process so short-lived commands do not pay its load time.

mod backend;
pub mod daemon;
mod embedder;
mod engine;
mod hash_embedder;
mod model_embedder;
pub mod model_registry;

pub use backend::{EmbedderBackend, EmbedderSelection, SelectOptions, select_embedder};
pub use embedder::{EmbedError, Embedder, EmbedderInfo, EmbedderTier, cosine_similarity};
pub use engine::{ContentSource, DEFAULT_SEARCH_LIMIT, SearchEngine, SearchHit, SearchQuery};
pub use hash_embedder::{DEFAULT_HASH_DIMENSION, HashEmbedder};
pub use model_embedder::ModelEmbedder;
pub use model_registry::{
    DEFAULT_MODEL, HASH_MODEL, ModelInfo, ModelKind, ModelRegistry, ResolvedModel,
};
