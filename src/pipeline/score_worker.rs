//! Priority assigner: drains the diff backlog, scoring each diff and
//! upserting its priority. Unlike the diff stage there is no expected
//! skip — every diff is scoreable.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::db::Db;
use crate::db::backlog::{BacklogMessage, DIFF_BACKLOG, DIFF_READY};
use crate::error::{Error, Result};
use crate::model::{DiffId, Priority};
use crate::scorer::Scorer;
use crate::telemetry::review::{record_outcome, start_stage_span};

use super::{DrainStats, WorkerConfig};

/// Worker loop for the scoring stage.
pub struct ScoreWorker {
    db: Arc<Db>,
    scorer: Arc<dyn Scorer>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for ScoreWorker {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            scorer: Arc::clone(&self.scorer),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl ScoreWorker {
    pub fn new(db: Arc<Db>, scorer: Arc<dyn Scorer>, config: WorkerConfig) -> Self {
        Self {
            db,
            scorer,
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
        listener.listen(DIFF_READY).await?;

        info!("score worker started, listening for diffs");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("score worker shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => debug!(diff = n.payload(), "notified of new diff"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain_once().await {
                error!("diff backlog drain error: {e}");
            }
        }
    }

    /// Drain the diff backlog until empty, isolating per-item failures.
    pub async fn drain_once(&self) -> Result<DrainStats> {
        let mut stats = DrainStats::default();

        while let Some(msg) = self
            .db
            .read_backlog(DIFF_BACKLOG, self.config.visibility_timeout)
            .await?
        {
            self.handle_message(msg, &mut stats).await;
        }

        if stats.processed + stats.skipped + stats.failed > 0 {
            debug!(
                processed = stats.processed,
                failed = stats.failed,
                "diff backlog drained"
            );
        }
        Ok(stats)
    }

    async fn handle_message(&self, msg: BacklogMessage, stats: &mut DrainStats) {
        let Some(diff_id) = parse_diff_id(&msg.message) else {
            warn!(msg_id = msg.msg_id, "bad backlog payload, archiving");
            if let Err(e) = self.db.archive_message(DIFF_BACKLOG, msg.msg_id).await {
                error!("archive error: {e}");
            }
            stats.failed += 1;
            return;
        };

        let span = start_stage_span("score", &diff_id.0);

        match self.process_diff(diff_id).instrument(span.clone()).await {
            Ok(priority) => {
                info!(diff = %diff_id, score = priority.score, "priority assigned");
                record_outcome(&span, "scored");
                stats.processed += 1;
                if let Err(e) = self.db.archive_message(DIFF_BACKLOG, msg.msg_id).await {
                    error!("archive error: {e}");
                }
            }
            Err(Error::NotFound(what)) => {
                error!(msg_id = msg.msg_id, "referenced entity missing: {what}");
                record_outcome(&span, "error");
                stats.failed += 1;
                if let Err(e) = self.db.archive_message(DIFF_BACKLOG, msg.msg_id).await {
                    error!("archive error: {e}");
                }
            }
            Err(e) => {
                // Scorer or database failure — leave for redelivery.
                warn!(diff = %diff_id, attempt = msg.read_ct, "scoring failed: {e}");
                record_outcome(&span, "error");
                stats.failed += 1;
            }
        }
    }

    /// Score one diff and persist its priority. Idempotent: a
    /// redelivered diff id replaces its score rather than duplicating
    /// the row, and keeps its original queue position.
    pub async fn process_diff(&self, diff_id: DiffId) -> Result<Priority> {
        let diff = self.db.get_diff(diff_id).await?;
        let score = self.scorer.score(&diff).await?;
        self.db.upsert_priority(diff_id, score).await
    }
}

fn parse_diff_id(payload: &serde_json::Value) -> Option<DiffId> {
    payload
        .get("diff_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(DiffId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_diff_id_from_payload() {
        let id = Uuid::new_v4();
        let payload = serde_json::json!({ "diff_id": id.to_string() });
        assert_eq!(parse_diff_id(&payload), Some(DiffId(id)));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(parse_diff_id(&serde_json::json!(null)), None);
        assert_eq!(
            parse_diff_id(&serde_json::json!({ "diff_id": "nope" })),
            None
        );
    }
}
