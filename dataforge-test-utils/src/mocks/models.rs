//! Mock quality model

use dataforge_core::error::StageError;
use dataforge_core::stages::{QualityModel, QualityVerdict};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Quality model with scripted answers
pub struct MockQualityModel {
    score: f64,
    fail: bool,
    short_answers: bool,
    batches: AtomicUsize,
}

impl MockQualityModel {
    /// Score every text with `score`
    pub fn fixed(score: f64) -> Self {
        Self {
            score,
            fail: false,
            short_answers: false,
            batches: AtomicUsize::new(0),
        }
    }

    /// Report the model as unavailable on every batch
    pub fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::fixed(0.0)
        }
    }

    /// Return one verdict fewer than requested
    pub fn short_answers(score: f64) -> Self {
        Self {
            short_answers: true,
            ..Self::fixed(score)
        }
    }

    /// Number of batches scored so far
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl QualityModel for MockQualityModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn score_batch(&self, texts: &[String]) -> Result<Vec<QualityVerdict>, StageError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::model_unavailable("quality_scorer", "mock model offline"));
        }
        let answers = if self.short_answers {
            texts.len().saturating_sub(1)
        } else {
            texts.len()
        };
        Ok((0..answers)
            .map(|_| QualityVerdict {
                score: self.score,
                reason: format!("mock verdict {:.1}", self.score),
            })
            .collect())
    }
}
