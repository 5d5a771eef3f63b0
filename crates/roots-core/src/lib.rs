//! roots-core: knowledge base engine for roots
//!
//! Knowledge lives as markdown leaves in a `{tree}/{branch}/{leaf}.md`
//! layout. Every leaf is embedded and indexed in SQLite for semantic search.
//!
//! # Architecture
//!
//! ```text
//! KnowledgeBase → Embedder (hash | model | daemon) → IndexStore (SQLite)
//!       ↓                                                  ↑
//!  SearchEngine ───────────── cosine ranking ──────────────┘
//! ```
//!
//! # Modules
//!
//! - `codec`: little-endian f32 vector packing for index blobs
//! - `index`: leaf and link store
//! - `search`: embedders, model registry, search engine and embedding daemon
//! - `knowledge`: markdown file layer
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//! - `error`: error types with remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod knowledge;
pub mod logging;
pub mod search;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
