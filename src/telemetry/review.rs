//! Span helpers for items flowing through the pipeline.
//!
//! One span wraps each backlog item from pop to archive, so a diff
//! computation, its persistence, and its retirement show up as a
//! single trace.

use tracing::Span;
use uuid::Uuid;

/// Start a span for processing one backlog item.
///
/// `stage` is "diff" or "score"; the outcome field is declared empty
/// and filled via [`record_outcome`].
pub fn start_stage_span(stage: &str, item_id: &Uuid) -> Span {
    tracing::info_span!(
        "pipeline.process",
        "pipeline.stage" = stage,
        "pipeline.item_id" = %item_id,
        "pipeline.outcome" = tracing::field::Empty,
    )
}

/// Record how the item left the stage ("diffed", "no_ancestor",
/// "scored", "error").
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("pipeline.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, "stage_outcome");
    });
}
