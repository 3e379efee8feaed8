//! Diff pipeline: drains the snapshot backlog, computing a diff
//! against each snapshot's nearest ancestor.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::db::backlog::{BacklogMessage, SNAPSHOT_BACKLOG, SNAPSHOT_READY};
use crate::db::diffs::DiffResult;
use crate::differ::Differ;
use crate::error::{Error, Result};
use crate::model::SnapshotId;
use crate::storage::DiffStore;
use crate::telemetry::metrics;
use crate::telemetry::review::{record_outcome, start_stage_span};

use super::{DrainStats, WorkerConfig};

/// Worker loop for the diff stage.
pub struct DiffWorker {
    db: Arc<Db>,
    differ: Arc<dyn Differ>,
    store: Arc<DiffStore>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for DiffWorker {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            differ: Arc::clone(&self.differ),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl DiffWorker {
    pub fn new(
        db: Arc<Db>,
        differ: Arc<dyn Differ>,
        store: Arc<DiffStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            differ,
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(SNAPSHOT_READY).await?;

        info!("diff worker started, listening for snapshots");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("diff worker shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => debug!(snapshot = n.payload(), "notified of new snapshot"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain_once().await {
                error!("snapshot backlog drain error: {e}");
            }
        }
    }

    /// Drain the snapshot backlog until empty. Per-item failures leave
    /// the message for visibility-timeout redelivery and keep going.
    pub async fn drain_once(&self) -> Result<DrainStats> {
        let mut stats = DrainStats::default();

        while let Some(msg) = self
            .db
            .read_backlog(SNAPSHOT_BACKLOG, self.config.visibility_timeout)
            .await?
        {
            self.handle_message(msg, &mut stats).await;
        }

        if stats.processed + stats.skipped + stats.failed > 0 {
            debug!(
                processed = stats.processed,
                skipped = stats.skipped,
                failed = stats.failed,
                "snapshot backlog drained"
            );
        }
        Ok(stats)
    }

    async fn handle_message(&self, msg: BacklogMessage, stats: &mut DrainStats) {
        let Some(snapshot_id) = parse_snapshot_id(&msg.message) else {
            warn!(msg_id = msg.msg_id, "bad backlog payload, archiving");
            if let Err(e) = self.db.archive_message(SNAPSHOT_BACKLOG, msg.msg_id).await {
                error!("archive error: {e}");
            }
            stats.failed += 1;
            return;
        };

        let span = start_stage_span("diff", &snapshot_id.0);

        let result = self
            .process_snapshot(snapshot_id)
            .instrument(span.clone())
            .await;

        match result {
            Ok(outcome) => {
                let label = match outcome {
                    DiffResult::Created(ref diff) => {
                        info!(snapshot = %snapshot_id, diff = %diff.id, "diff computed");
                        stats.processed += 1;
                        "diffed"
                    }
                    DiffResult::Existing(_) => {
                        // Redelivered message — the diff already exists.
                        stats.skipped += 1;
                        "duplicate"
                    }
                };
                record_outcome(&span, label);
                metrics::snapshots_processed().add(1, &[KeyValue::new("result", label)]);
                if let Err(e) = self.db.archive_message(SNAPSHOT_BACKLOG, msg.msg_id).await {
                    error!("archive error: {e}");
                }
            }
            Err(Error::NoAncestor(id)) => {
                // First capture of its page. Expected; never retried.
                debug!(snapshot = %id, "first capture of its page, no diff");
                record_outcome(&span, "no_ancestor");
                metrics::snapshots_processed().add(1, &[KeyValue::new("result", "no_ancestor")]);
                stats.skipped += 1;
                if let Err(e) = self.db.archive_message(SNAPSHOT_BACKLOG, msg.msg_id).await {
                    error!("archive error: {e}");
                }
            }
            Err(e @ (Error::NotFound(_) | Error::InvalidPair(_))) => {
                // Enqueue and insert are transactional, so a missing
                // row or bad pair is a data-integrity bug. Retrying
                // cannot fix it; archive so the drain doesn't spin on
                // it forever.
                error!(msg_id = msg.msg_id, "unprocessable snapshot: {e}");
                record_outcome(&span, "error");
                metrics::snapshots_processed().add(1, &[KeyValue::new("result", "error")]);
                stats.failed += 1;
                if let Err(e) = self.db.archive_message(SNAPSHOT_BACKLOG, msg.msg_id).await {
                    error!("archive error: {e}");
                }
            }
            Err(e) => {
                // Diff service or database failure. Leave the message —
                // the visibility timeout will make it reappear for retry.
                warn!(snapshot = %snapshot_id, attempt = msg.read_ct, "diff failed: {e}");
                record_outcome(&span, "error");
                metrics::snapshots_processed().add(1, &[KeyValue::new("result", "error")]);
                stats.failed += 1;
            }
        }
    }

    /// Process one snapshot: find its nearest ancestor, compute the
    /// diff externally, persist and enqueue the result.
    ///
    /// Fails with `NoAncestor` for the earliest snapshot of a page —
    /// an expected signal, not a failure. No database locks are held
    /// while the external computation is in flight.
    pub async fn process_snapshot(&self, snapshot_id: SnapshotId) -> Result<DiffResult> {
        let snapshot = self.db.get_snapshot(snapshot_id).await?;

        let ancestor = self
            .db
            .find_ancestor(snapshot.page_id, snapshot.capture_time)
            .await?
            .ok_or(Error::NoAncestor(snapshot_id))?;

        let started = Instant::now();
        let payload = self
            .differ
            .compute(&ancestor.content_ref, &snapshot.content_ref)
            .await?;
        metrics::diff_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let stored = self.store.store(&payload).await?;

        self.db
            .insert_diff(
                ancestor.id,
                snapshot.id,
                &stored.content_hash,
                &stored.result_ref,
            )
            .await
    }
}

fn parse_snapshot_id(payload: &serde_json::Value) -> Option<SnapshotId> {
    payload
        .get("snapshot_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(SnapshotId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_id_from_payload() {
        let id = Uuid::new_v4();
        let payload = serde_json::json!({ "snapshot_id": id.to_string() });
        assert_eq!(parse_snapshot_id(&payload), Some(SnapshotId(id)));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(parse_snapshot_id(&serde_json::json!({})), None);
        assert_eq!(
            parse_snapshot_id(&serde_json::json!({ "snapshot_id": "not-a-uuid" })),
            None
        );
        assert_eq!(
            parse_snapshot_id(&serde_json::json!({ "snapshot_id": 42 })),
            None
        );
    }
}
