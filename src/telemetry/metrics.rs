//! Metric instrument factories for pagewatch-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"pagewatch-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for pagewatch-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("pagewatch-rs")
}

/// Counter: page ingestions.
/// Labels: `result` ("created" | "existing").
pub fn pages_created() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.pages.created")
        .with_description("Number of page ingestions")
        .build()
}

/// Counter: snapshots ingested into the pipeline.
pub fn snapshots_ingested() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.snapshots.ingested")
        .with_description("Number of snapshots ingested")
        .build()
}

/// Counter: diff pipeline outcomes per snapshot processed.
/// Labels: `result` ("diffed" | "no_ancestor" | "error").
pub fn snapshots_processed() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.snapshots.processed")
        .with_description("Number of snapshots drained from the backlog")
        .build()
}

/// Counter: diff rows persisted.
/// Labels: `result` ("created" | "duplicate").
pub fn diffs_persisted() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.diffs.persisted")
        .with_description("Number of diff rows persisted")
        .build()
}

/// Counter: priorities written by the assigner.
pub fn priorities_assigned() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.priorities.assigned")
        .with_description("Number of priority scores written")
        .build()
}

/// Counter: backlog-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn backlog_operations() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.backlog.operations")
        .with_description("Number of backlog queue operations")
        .build()
}

/// Counter: review checkouts.
/// Labels: `result` ("leased" | "empty").
pub fn review_checkouts() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.review.checkouts")
        .with_description("Number of review checkout attempts")
        .build()
}

/// Counter: review checkins.
/// Labels: `result` ("ok" | "no_lease").
pub fn review_checkins() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.review.checkins")
        .with_description("Number of review checkin attempts")
        .build()
}

/// Counter: annotations recorded.
pub fn annotations_recorded() -> Counter<u64> {
    meter()
        .u64_counter("pagewatch.annotations.recorded")
        .with_description("Number of annotations recorded")
        .build()
}

/// Histogram: wall time of external diff computations.
pub fn diff_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pagewatch.diff.duration_ms")
        .with_description("External diff computation duration in ms")
        .build()
}
