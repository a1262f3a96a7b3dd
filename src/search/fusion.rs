//! Weighted score fusion of semantic and keyword results.

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::search::types::{SearchResult, SourceTag};

struct Fused {
    result: SearchResult,
    semantic: Option<f32>,
    keyword: Option<f32>,
}

/// Accumulates sub-search results keyed by id.
///
/// The fused score of a result is
/// `semantic * semantic_weight + keyword * keyword_weight`, with a missing
/// component counting as zero. Results can be added in any order.
///
/// ```
/// use pilum::search::{Fusion, SearchResult, SourceTag};
///
/// fn hit(id: &str, score: f32, source: SourceTag) -> SearchResult {
///     SearchResult {
///         id: id.to_string(),
///         content: String::new(),
///         metadata: serde_json::Value::Null,
///         score,
///         semantic_score: None,
///         keyword_score: None,
///         source,
///         highlight: None,
///         created_at: None,
///     }
/// }
///
/// let fused = Fusion::new(0.7, 0.3)
///     .add(SourceTag::Semantic, vec![hit("a", 0.9, SourceTag::Semantic)])
///     .add(SourceTag::Keyword, vec![hit("a", 0.4, SourceTag::Keyword)])
///     .finish();
///
/// assert!((fused[0].score - 0.75).abs() < 1e-6);
/// assert_eq!(fused[0].source, SourceTag::Hybrid);
/// ```
pub struct Fusion {
    semantic_weight: f32,
    keyword_weight: f32,
    entries: AHashMap<String, Fused>,
}

impl Fusion {
    pub fn new(semantic_weight: f32, keyword_weight: f32) -> Self {
        Self {
            semantic_weight,
            keyword_weight,
            entries: AHashMap::new(),
        }
    }

    /// Add the results of one sub-search. `source` must be `Semantic` or
    /// `Keyword`; a result's own component score is its `score`.
    pub fn add(mut self, source: SourceTag, results: Vec<SearchResult>) -> Self {
        for result in results {
            let component = match source {
                SourceTag::Semantic => result.semantic_score.unwrap_or(result.score),
                SourceTag::Keyword => result.keyword_score.unwrap_or(result.score),
                SourceTag::Hybrid => result.score,
            };
            match self.entries.get_mut(&result.id) {
                Some(fused) => {
                    if fused.result.highlight.is_none() {
                        fused.result.highlight = result.highlight;
                    }
                    set_component(fused, source, component);
                }
                None => {
                    let mut fused = Fused {
                        result,
                        semantic: None,
                        keyword: None,
                    };
                    set_component(&mut fused, source, component);
                    self.entries.insert(fused.result.id.clone(), fused);
                }
            }
        }
        self
    }

    /// Fused results, best first; ties are broken by id.
    pub fn finish(self) -> Vec<SearchResult> {
        let (sw, kw) = (self.semantic_weight, self.keyword_weight);
        let mut results: Vec<SearchResult> = self
            .entries
            .into_values()
            .map(|fused| {
                let mut result = fused.result;
                result.semantic_score = fused.semantic;
                result.keyword_score = fused.keyword;
                result.score = fused.semantic.unwrap_or(0.0) * sw + fused.keyword.unwrap_or(0.0) * kw;
                result.source = match (fused.semantic, fused.keyword) {
                    (Some(_), Some(_)) => SourceTag::Hybrid,
                    (None, Some(_)) => SourceTag::Keyword,
                    _ => SourceTag::Semantic,
                };
                result
            })
            .collect();
        sort_by_score(&mut results);
        results
    }
}

fn set_component(fused: &mut Fused, source: SourceTag, component: f32) {
    match source {
        SourceTag::Keyword => fused.keyword = Some(component),
        _ => fused.semantic = Some(component),
    }
}

/// Fuse semantic and keyword results with the given weights.
pub fn fuse(
    semantic: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    semantic_weight: f32,
    keyword_weight: f32,
) -> Vec<SearchResult> {
    Fusion::new(semantic_weight, keyword_weight)
        .add(SourceTag::Semantic, semantic)
        .add(SourceTag::Keyword, keyword)
        .finish()
}

/// Sort by descending score, then ascending id.
pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
