//! Injected embedding and query-expansion hooks.

use std::collections::HashMap;
use std::future::Future;
use std::hash::BuildHasher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{PilumError, Result};

/// Turns text into a dense vector.
///
/// Provider selection, batching and fallback live behind this trait.
///
/// ```
/// use async_trait::async_trait;
/// use pilum::error::Result;
/// use pilum::search::Embedder;
///
/// struct Constant;
///
/// #[async_trait]
/// impl Embedder for Constant {
///     async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
///         Ok(vec![1.0, 0.0, 0.0])
///     }
///
///     fn dimension(&self) -> usize {
///         3
///     }
/// }
/// ```
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector `embed` returns.
    fn dimension(&self) -> usize;
}

/// [`Embedder`] backed by an async closure.
pub struct FnEmbedder<F> {
    dimension: usize,
    func: F,
}

impl<F, Fut> FnEmbedder<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<f32>>> + Send,
{
    pub fn new(dimension: usize, func: F) -> Self {
        Self { dimension, func }
    }
}

#[async_trait]
impl<F, Fut> Embedder for FnEmbedder<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<f32>>> + Send,
{
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (self.func)(text.to_string()).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercased word is hashed into one of `dimension` buckets with a
/// hash-derived sign, and the vector is L2-normalised. Texts sharing words
/// get positive cosine similarity, which is enough for development and
/// tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    hasher: ahash::RandomState,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            hasher: ahash::RandomState::with_seeds(
                0x5851_f42d_4c95_7f2d,
                0x1405_7b7e_f767_814f,
                0x2545_f491_4f6c_dd1d,
                0x9e37_79b9_7f4a_7c15,
            ),
        }
    }

    /// Embed without going through the async trait.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text.unicode_words() {
            let hash = self.hasher.hash_one(word.to_lowercase());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(PilumError::embedding("cannot embed empty text"));
        }
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Rewrites query text before semantic retrieval.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, text: &str) -> Result<String>;
}

/// Returns the text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExpander;

#[async_trait]
impl QueryExpander for NoopExpander {
    async fn expand(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Appends synonyms of the words in the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymExpander {
    synonyms: HashMap<String, Vec<String>>,
    max_expansions: usize,
}

impl Default for SynonymExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl SynonymExpander {
    pub fn new() -> Self {
        Self {
            synonyms: HashMap::new(),
            max_expansions: 5,
        }
    }

    /// Register `synonyms` for `word` (case-insensitive).
    pub fn with_synonyms<I, S>(mut self, word: &str, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms
            .entry(word.to_lowercase())
            .or_default()
            .extend(synonyms.into_iter().map(Into::into));
        self
    }

    /// Cap on the number of appended terms.
    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    /// Expand without going through the async trait.
    pub fn expand_sync(&self, text: &str) -> String {
        let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
        let mut extra: Vec<&str> = Vec::new();
        for word in &words {
            let Some(synonyms) = self.synonyms.get(word) else {
                continue;
            };
            for synonym in synonyms {
                if extra.len() >= self.max_expansions {
                    break;
                }
                let lower = synonym.to_lowercase();
                if !words.contains(&lower) && !extra.iter().any(|e| e.eq_ignore_ascii_case(synonym)) {
                    extra.push(synonym.as_str());
                }
            }
        }

        if extra.is_empty() {
            text.to_string()
        } else {
            format!("{text} {}", extra.join(" "))
        }
    }
}

#[async_trait]
impl QueryExpander for SynonymExpander {
    async fn expand(&self, text: &str) -> Result<String> {
        Ok(self.expand_sync(text))
    }
}
