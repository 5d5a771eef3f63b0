//! FNV-1a feature-hashing embedder. Always available, no model files.
use super::embedder::{EmbedError, Embedder, EmbedderInfo, EmbedderTier};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

/// Default output dimension.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

const TRIGRAM_WEIGHT: f32 = 1.0;
const WORD_WEIGHT: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "dimension must be > 0");
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub(crate) fn l2_normalize(v: &mut [f32]) -> f32 {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

impl HashEmbedder {
    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dimension as u64) as usize
    }
}

impl Embedder for HashEmbedder {
    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            name: format!("fnv1a-hash-{}", self.dimension),
            dimension: self.dimension,
            tier: EmbedderTier::Hash,
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(vector);
        }

        let chars: Vec<char> = normalized.chars().collect();
        let mut trigram = String::with_capacity(12);
        for window in chars.windows(3) {
            trigram.clear();
            trigram.extend(window);
            vector[self.bucket(&trigram)] += TRIGRAM_WEIGHT;
        }
        for word in normalized.split_whitespace() {
            vector[self.bucket(word)] += WORD_WEIGHT;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::cosine_similarity;

    #[test]
    fn basic_embedding() {
        let emb = HashEmbedder::new(64);
        let v = emb.embed("hello world").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn deterministic() {
        let emb = HashEmbedder::default();
        assert_eq!(emb.embed("test").unwrap(), emb.embed("test").unwrap());
    }

    #[test]
    fn stable_across_instances() {
        let a = HashEmbedder::default().embed("stable text").unwrap();
        let b = HashEmbedder::default().embed("stable text").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let emb = HashEmbedder::new(128);
        let v1 = emb.embed("hello").unwrap();
        let v2 = emb.embed("goodbye").unwrap();
        assert!(cosine_similarity(&v1, &v2) < 0.99);
    }

    #[test]
    fn empty_and_whitespace_are_zero() {
        let emb = HashEmbedder::new(32);
        assert!(emb.embed("").unwrap().iter().all(|&x| x == 0.0));
        assert!(emb.embed(" \t\n ").unwrap().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn case_and_padding_insensitive() {
        let emb = HashEmbedder::new(64);
        assert_eq!(emb.embed("  Hello ").unwrap(), emb.embed("hello").unwrap());
    }

    #[test]
    fn single_char_still_embeds() {
        // No trigrams, but the word itself lands in a bucket.
        let emb = HashEmbedder::new(64);
        let v = emb.embed("a").unwrap();
        let nonzero: Vec<f32> = v.iter().copied().filter(|&x| x != 0.0).collect();
        assert_eq!(nonzero.len(), 1);
        assert!((nonzero[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn words_weigh_twice_trigrams() {
        let emb = HashEmbedder::new(1 << 16);
        let v = emb.embed("ab cd").unwrap();
        let word = v[emb.bucket("ab")];
        let trigram = v[emb.bucket("b c")];
        assert!(trigram > 0.0);
        assert!((word / trigram - 2.0).abs() < 1e-5);
    }

    #[test]
    fn batch_embed() {
        let emb = HashEmbedder::new(64);
        let results = emb.embed_batch(&["hello", "world"]).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], emb.embed("hello").unwrap());
    }

    #[test]
    fn dimension_accessor() {
        let emb = HashEmbedder::new(256);
        assert_eq!(emb.dimension(), 256);
        assert_eq!(emb.tier(), EmbedderTier::Hash);
        assert_eq!(HashEmbedder::default().dimension(), DEFAULT_HASH_DIMENSION);
    }

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        assert_ne!(fnv1a(b"a"), fnv1a(b"b"));
    }

    #[test]
    fn l2_normalize_unit() {
        let mut v = vec![3.0, 4.0];
        assert!((l2_normalize(&mut v) - 5.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 0.001);
        assert!((v[1] - 0.8).abs() < 0.001);
    }

    #[test]
    fn l2_normalize_zero_stays_zero() {
        let mut v = vec![0.0, 0.0];
        assert_eq!(l2_normalize(&mut v), 0.0);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "dimension must be > 0")]
    fn zero_dimension_panics() {
        HashEmbedder::new(0);
    }

    #[test]
    fn shared_words_correlate() {
        let emb = HashEmbedder::default();
        let q = emb.embed("rust error handling").unwrap();
        let a = emb.embed("error handling in rust with result").unwrap();
        let b = emb.embed("baking sourdough bread at home").unwrap();
        assert!(cosine_similarity(&q, &a) > cosine_similarity(&q, &b));
    }

    #[test]
    fn unicode_input() {
        let emb = HashEmbedder::new(64);
        let v = emb.embed("こんにちは世界").unwrap();
        assert_eq!(v.len(), 64);
        assert!(v.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn info_name_format() {
        let info = HashEmbedder::new(512).info();
        assert_eq!(info.name, "fnv1a-hash-512");
        assert_eq!(info.tier, EmbedderTier::Hash);
    }
}
