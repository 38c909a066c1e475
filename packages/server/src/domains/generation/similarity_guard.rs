//! Near-duplicate detection against recently posted content.

use serde::Serialize;

use crate::common::utils::cosine_similarity;
use crate::common::PostId;
use crate::domains::posts::PostedEmbedding;

#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    /// Max similarity at or above this rejects the draft
    pub threshold: f64,
    /// How many recent posted embeddings to compare against
    pub corpus_size: i64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.86,
            corpus_size: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub post_id: PostId,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimilarityReport {
    pub max_score: f64,
    /// Posts at or above the threshold, highest score first
    pub hits: Vec<SimilarityHit>,
}

impl SimilarityReport {
    pub fn too_similar(&self) -> bool {
        !self.hits.is_empty()
    }
}

pub struct SimilarityGuard<'a> {
    config: &'a SimilarityConfig,
}

impl<'a> SimilarityGuard<'a> {
    pub fn new(config: &'a SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, candidate: &[f32], corpus: &[PostedEmbedding]) -> SimilarityReport {
        // 0.0 for an empty corpus; otherwise the true maximum, which may be negative.
        let mut max_score = if corpus.is_empty() { 0.0 } else { f64::NEG_INFINITY };
        let mut hits = Vec::new();

        for posted in corpus {
            let score = cosine_similarity(candidate, posted.embedding.as_slice());
            max_score = max_score.max(score);
            if score >= self.config.threshold {
                hits.push(SimilarityHit {
                    post_id: posted.post_id,
                    score,
                });
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        SimilarityReport { max_score, hits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posted(values: Vec<f32>) -> PostedEmbedding {
        PostedEmbedding {
            post_id: PostId::new(),
            embedding: pgvector::Vector::from(values),
        }
    }

    #[test]
    fn distinct_content_passes() {
        let config = SimilarityConfig::default();
        let corpus = vec![posted(vec![0.0, 1.0, 0.0]), posted(vec![0.0, 0.0, 1.0])];
        let report = SimilarityGuard::new(&config).check(&[1.0, 0.0, 0.0], &corpus);
        assert!(!report.too_similar());
        assert_eq!(report.max_score, 0.0);
    }

    #[test]
    fn hits_are_sorted_by_score() {
        let config = SimilarityConfig::default();
        let close = posted(vec![1.0, 0.1, 0.0]);
        let identical = posted(vec![1.0, 0.0, 0.0]);
        let far = posted(vec![0.0, 1.0, 0.0]);
        let corpus = vec![close.clone(), far, identical.clone()];

        let report = SimilarityGuard::new(&config).check(&[1.0, 0.0, 0.0], &corpus);

        assert!(report.too_similar());
        let ids: Vec<_> = report.hits.iter().map(|h| h.post_id).collect();
        assert_eq!(ids, vec![identical.post_id, close.post_id]);
        assert!((report.max_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposed_corpus_reports_its_negative_maximum() {
        let config = SimilarityConfig::default();
        let corpus = vec![posted(vec![-1.0, 0.0]), posted(vec![-0.6, -0.8])];
        let report = SimilarityGuard::new(&config).check(&[1.0, 0.0], &corpus);
        assert!(!report.too_similar());
        assert!((report.max_score - (-0.6)).abs() < 1e-6);
    }

    #[test]
    fn empty_corpus_is_never_similar() {
        let config = SimilarityConfig::default();
        let report = SimilarityGuard::new(&config).check(&[0.3, 0.4], &[]);
        assert_eq!(report, SimilarityReport::default());
    }
}
