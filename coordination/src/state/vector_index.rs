//! In-process nearest-neighbour lookup over validated retrieval patterns.
//!
//! Not a vector database: the hot store is the source of truth for patterns,
//! this index is a cache rebuilt from `HotStore::all_patterns()` and queried
//! with a plain cosine-similarity scan. Fine at the pattern-library scale
//! this pipeline operates at; reconsider if the library grows past a few
//! thousand entries.

use super::store::{HotStore, StoreResult};
use super::types::RetrievalPattern;

pub struct VectorIndex {
    patterns: Vec<RetrievalPattern>,
}

impl VectorIndex {
    pub fn rebuild(store: &HotStore) -> StoreResult<Self> {
        Ok(Self {
            patterns: store.all_patterns()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Return up to `max_patterns` patterns whose embedding cosine similarity
    /// to `query` is at or above `threshold`, highest similarity first.
    /// Returns an empty vec when no pattern clears the bar, including when
    /// the index has no patterns at all — callers fall back to generation
    /// without retrieval in that case.
    pub fn query(
        &self,
        query: &[f32],
        max_patterns: usize,
        threshold: f32,
    ) -> Vec<&RetrievalPattern> {
        let mut scored: Vec<(f32, &RetrievalPattern)> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                let score = cosine_similarity(query, &pattern.embedding)?;
                (score >= threshold).then_some((score, pattern))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(max_patterns)
            .map(|(_, pattern)| pattern)
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{Complexity, PatternMetadata};

    fn pattern(code: &str, embedding: Vec<f32>) -> RetrievalPattern {
        RetrievalPattern::new(
            code,
            PatternMetadata {
                feature: "login".into(),
                complexity: Complexity::Easy,
                validated: true,
                validator_phase2: false,
            },
            embedding,
        )
    }

    #[test]
    fn returns_closest_match_above_threshold() {
        let index = VectorIndex {
            patterns: vec![
                pattern("a", vec![1.0, 0.0]),
                pattern("b", vec![0.0, 1.0]),
            ],
        };
        let hits = index.query(&[1.0, 0.0], 5, 0.9);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code, "a");
    }

    #[test]
    fn empty_index_returns_no_patterns() {
        let index = VectorIndex { patterns: vec![] };
        assert!(index.query(&[1.0, 0.0], 5, 0.5).is_empty());
    }

    #[test]
    fn respects_max_patterns_cap() {
        let index = VectorIndex {
            patterns: vec![
                pattern("a", vec![1.0, 0.0]),
                pattern("b", vec![0.9, 0.1]),
                pattern("c", vec![0.8, 0.2]),
            ],
        };
        let hits = index.query(&[1.0, 0.0], 2, 0.0);
        assert_eq!(hits.len(), 2);
    }
}
