//! Pluggable scoring models used by the semantic and AI-backed stage paths

use crate::error::StageError;
use serde::{Deserialize, Serialize};

/// Turns text into a vector for near-duplicate detection
///
/// Implementations must be deterministic: the same text always yields the
/// same vector.
pub trait SimilarityModel: Send + Sync {
    /// Name recorded in stage metadata
    fn name(&self) -> &str;

    /// Embed one text
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Cosine similarity of two vectors; zero vectors are dissimilar to everything
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Hashed bag-of-words term frequencies
///
/// Tokens are lowercased alphanumeric runs, hashed with CRC32 into a fixed
/// number of buckets.
#[derive(Debug, Clone)]
pub struct BagOfWordsModel {
    dimensions: usize,
}

impl BagOfWordsModel {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for BagOfWordsModel {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SimilarityModel for BagOfWordsModel {
    fn name(&self) -> &str {
        "bag-of-words"
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let bucket = crc32fast::hash(token.as_bytes()) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }
        vector
    }
}

/// Score assigned to one text by a quality model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// 0-10
    pub score: f64,
    pub reason: String,
}

/// External quality scorer (for example an LLM behind an HTTP API)
///
/// Called once per batch of texts; it must return one verdict per text.
pub trait QualityModel: Send + Sync {
    fn name(&self) -> &str;

    fn score_batch(&self, texts: &[String]) -> Result<Vec<QualityVerdict>, StageError>;
}
