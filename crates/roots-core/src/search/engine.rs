//! Vector search over the leaf index with metadata filters.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use super::embedder::{Embedder, cosine_similarity};
use crate::Result;
use crate::index::{IndexEntry, IndexStore, Tier};

/// Default number of hits returned.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Supplies leaf content at query time; the index holds no text.
pub trait ContentSource {
    /// `None` when the backing content is gone.
    fn load_content(&self, file_path: &str) -> Option<String>;
}

impl ContentSource for HashMap<String, String> {
    fn load_content(&self, file_path: &str) -> Option<String> {
        self.get(file_path).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    /// Empty means every tier.
    pub tiers: Vec<Tier>,
    /// Empty means no tag filter; otherwise any shared tag matches.
    pub tags: Vec<String>,
    pub min_confidence: f64,
    pub min_score: Option<f64>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            tiers: Vec::new(),
            tags: Vec::new(),
            min_confidence: 0.0,
            min_score: None,
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn tiers(mut self, tiers: impl IntoIterator<Item = Tier>) -> Self {
        self.tiers = tiers.into_iter().collect();
        self
    }

    #[must_use]
    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    #[must_use]
    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    fn admits(&self, entry: &IndexEntry) -> bool {
        if !self.tiers.is_empty() && !self.tiers.contains(&entry.tier) {
            return false;
        }
        if !self.tags.is_empty() && !entry.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        entry.confidence >= self.min_confidence
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub content: String,
    pub tier: Tier,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub score: f64,
}

pub struct SearchEngine<'a> {
    store: &'a IndexStore,
    embedder: &'a dyn Embedder,
    source: &'a dyn ContentSource,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        store: &'a IndexStore,
        embedder: &'a dyn Embedder,
        source: &'a dyn ContentSource,
    ) -> Self {
        Self {
            store,
            embedder,
            source,
        }
    }

    /// Embed the query text, then rank.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(&query.text)?;
        self.search_vector(&vector, query)
    }

    /// Rank indexed entries against an already-embedded query. Ties keep
    /// index order. Entries whose content cannot be loaded are skipped.
    pub fn search_vector(&self, vector: &[f32], query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let entries = self.store.get_all_leaves()?;
        let total = entries.len();

        let mut scored: Vec<(f64, IndexEntry)> = entries
            .into_iter()
            .filter(|entry| query.admits(entry))
            .map(|entry| (cosine_similarity(vector, &entry.embedding), entry))
            .filter(|(score, _)| query.min_score.is_none_or(|min| *score >= min))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut hits = Vec::with_capacity(query.limit.min(scored.len()));
        for (score, entry) in scored {
            if hits.len() == query.limit {
                break;
            }
            let Some(content) = self.source.load_content(&entry.file_path) else {
                debug!(file_path = %entry.file_path, "Skipping indexed leaf with missing content");
                continue;
            };
            hits.push(SearchHit {
                file_path: entry.file_path,
                content,
                tier: entry.tier,
                confidence: entry.confidence,
                tags: entry.tags,
                score,
            });
        }
        debug!(candidates = total, returned = hits.len(), "Search complete");
        Ok(hits)
    }
}
