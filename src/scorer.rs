//! Priority scoring.
//!
//! How a diff's review priority is computed is pluggable; the queue
//! only orders by the resulting number. Swapping scorers never touches
//! queue logic.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Diff;

/// Assigns a review priority score to a diff. Higher = review sooner.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, diff: &Diff) -> Result<f64>;
}

/// Stub scorer giving every diff the same score. With equal scores the
/// queue degrades to pure FIFO on priority-assignment time.
pub struct ConstantScorer {
    score: f64,
}

impl ConstantScorer {
    pub fn new(score: f64) -> Self {
        Self { score }
    }
}

impl Default for ConstantScorer {
    fn default() -> Self {
        Self { score: 0.5 }
    }
}

#[async_trait]
impl Scorer for ConstantScorer {
    async fn score(&self, _diff: &Diff) -> Result<f64> {
        Ok(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiffId, SnapshotId};

    fn dummy_diff() -> Diff {
        Diff {
            id: DiffId::new(),
            content_hash: "0".repeat(64),
            from_snapshot: SnapshotId::new(),
            to_snapshot: SnapshotId::new(),
            result_ref: "diffs/00/00000000.json".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn constant_scorer_is_constant() {
        let scorer = ConstantScorer::new(0.9);
        let a = scorer.score(&dummy_diff()).await.unwrap();
        let b = scorer.score(&dummy_diff()).await.unwrap();
        assert_eq!(a, 0.9);
        assert_eq!(a, b);
    }
}
