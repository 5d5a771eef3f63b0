//! Property-based tests for the hashing embedder.
//!
//! Verifies invariants of `HashEmbedder` (FNV-1a feature hashing over
//! trigrams and words):
//! - Output dimension: embed(text).len() == dimension for all inputs
//! - Determinism across calls and instances
//! - L2 normalization: norm is 0 for blank text, otherwise ≈ 1.0
//! - Case and surrounding-whitespace insensitivity
//! - Batch embed matches individual embed
//! - Cosine self-similarity ≈ 1.0, and cosine always lies in [-1, 1]

use proptest::prelude::*;

use roots_core::search::{
    DEFAULT_HASH_DIMENSION, Embedder, EmbedderTier, HashEmbedder, cosine_similarity,
};

// ────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|&x| x == 0.0)
}

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_dimension() -> impl Strategy<Value = usize> {
    1usize..=1024
}

/// Non-trivial dimension for tests where very small dims cause collisions.
fn arb_medium_dimension() -> impl Strategy<Value = usize> {
    32usize..=512
}

fn arb_ascii_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{0,200}").unwrap()
}

/// Text with at least one non-whitespace character.
fn arb_word_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,12}( [a-z]{1,12}){0,10}").unwrap()
}

fn arb_blank_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ \t\n]{0,20}").unwrap()
}

// ────────────────────────────────────────────────────────────────────
// Output dimension
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn output_length_equals_dimension(
        dim in arb_dimension(),
        text in arb_ascii_text(),
    ) {
        let emb = HashEmbedder::new(dim);
        let v = emb.embed(&text).unwrap();
        prop_assert_eq!(v.len(), dim);
        prop_assert_eq!(emb.dimension(), dim);
        prop_assert_eq!(emb.info().dimension, dim);
    }
}

// ────────────────────────────────────────────────────────────────────
// Determinism
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn determinism_across_instances(
        dim in arb_medium_dimension(),
        text in arb_ascii_text(),
    ) {
        let v1 = HashEmbedder::new(dim).embed(&text).unwrap();
        let v2 = HashEmbedder::new(dim).embed(&text).unwrap();
        prop_assert_eq!(v1, v2);
    }
}

// ────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any text with a word is a unit vector, even below trigram length.
    #[test]
    fn word_text_is_unit_norm(
        dim in arb_medium_dimension(),
        text in arb_word_text(),
    ) {
        let v = HashEmbedder::new(dim).embed(&text).unwrap();
        let norm = l2_norm(&v);
        prop_assert!((norm - 1.0).abs() < 1e-4, "norm {} for {:?}", norm, text);
    }

    #[test]
    fn blank_text_is_zero(dim in arb_dimension(), text in arb_blank_text()) {
        let v = HashEmbedder::new(dim).embed(&text).unwrap();
        prop_assert!(is_zero_vector(&v));
    }

    #[test]
    fn norm_is_zero_or_unit(dim in arb_medium_dimension(), text in arb_ascii_text()) {
        let v = HashEmbedder::new(dim).embed(&text).unwrap();
        let norm = l2_norm(&v);
        prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
    }
}

// ────────────────────────────────────────────────────────────────────
// Normalization of input text
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn case_insensitive(text in arb_word_text()) {
        let emb = HashEmbedder::default();
        prop_assert_eq!(
            emb.embed(&text.to_uppercase()).unwrap(),
            emb.embed(&text).unwrap()
        );
    }

    #[test]
    fn surrounding_whitespace_ignored(text in arb_word_text(), pad in arb_blank_text()) {
        let emb = HashEmbedder::default();
        let padded = format!("{pad}{text}{pad}");
        prop_assert_eq!(emb.embed(&padded).unwrap(), emb.embed(&text).unwrap());
    }
}

// ────────────────────────────────────────────────────────────────────
// Batch and similarity
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn batch_matches_individual(
        texts in prop::collection::vec(arb_ascii_text(), 0..8),
    ) {
        let emb = HashEmbedder::new(64);
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let batch = emb.embed_batch(&refs).unwrap();
        prop_assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            prop_assert_eq!(vector, &emb.embed(text).unwrap());
        }
    }

    #[test]
    fn self_similarity_is_one(text in arb_word_text()) {
        let v = HashEmbedder::default().embed(&text).unwrap();
        let sim = cosine_similarity(&v, &v);
        prop_assert!((sim - 1.0).abs() < 1e-5, "self similarity {}", sim);
    }

    #[test]
    fn cosine_is_bounded(a in arb_ascii_text(), b in arb_ascii_text()) {
        let emb = HashEmbedder::new(128);
        let sim = cosine_similarity(&emb.embed(&a).unwrap(), &emb.embed(&b).unwrap());
        prop_assert!((-1.0..=1.0).contains(&sim));
        // Hash features only add, so overlap is never negative.
        prop_assert!(sim >= 0.0);
    }
}

// ────────────────────────────────────────────────────────────────────
// Fixed expectations
// ────────────────────────────────────────────────────────────────────

#[test]
fn default_dimension_and_info() {
    let emb = HashEmbedder::default();
    assert_eq!(emb.dimension(), DEFAULT_HASH_DIMENSION);
    assert_eq!(emb.tier(), EmbedderTier::Hash);
    assert_eq!(emb.info().name, format!("fnv1a-hash-{DEFAULT_HASH_DIMENSION}"));
}

#[test]
fn related_text_scores_higher_than_unrelated() {
    let emb = HashEmbedder::default();
    let query = emb.embed("sqlite database index").unwrap();
    let related = emb.embed("the sqlite database keeps an index of leaves").unwrap();
    let unrelated = emb.embed("bake bread at a high temperature").unwrap();
    assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
}
