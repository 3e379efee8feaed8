//! Backlog operations on pgmq queues via direct SQLx.
//!
//! Two independent backlogs track items awaiting the next pipeline
//! stage: `snapshot_backlog` (captures awaiting diff computation) and
//! `diff_backlog` (diffs awaiting a priority score). pgmq gives FIFO
//! delivery with a visibility timeout, so a popped identifier that is
//! never archived reappears for another drainer — at-least-once
//! delivery, with idempotent downstream inserts absorbing duplicates.

use crate::error::Result;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Queue holding snapshot ids awaiting diff computation.
pub const SNAPSHOT_BACKLOG: &str = "snapshot_backlog";
/// Queue holding diff ids awaiting priority assignment.
pub const DIFF_BACKLOG: &str = "diff_backlog";

/// NOTIFY channel fired when a snapshot is enqueued.
pub const SNAPSHOT_READY: &str = "snapshot_ready";
/// NOTIFY channel fired when a diff is enqueued.
pub const DIFF_READY: &str = "diff_ready";

/// A message read from a backlog.
#[derive(Debug, Clone)]
pub struct BacklogMessage {
    pub msg_id: i64,
    /// How many times this message has been delivered. >1 means a
    /// previous attempt timed out or failed.
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        metrics::backlog_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "create"),
            ],
        );
        Ok(())
    }

    /// Enqueue a payload, returning its message id. Entity ingestion
    /// sends inside its own insert transaction; this standalone send
    /// serves operational tooling.
    pub async fn send_message(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        metrics::backlog_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "send"),
            ],
        );
        Ok(msg_id)
    }

    /// Read the next message from a backlog (visibility timeout in
    /// seconds). Returns None if the backlog is empty — a normal
    /// result, not an error.
    pub async fn read_backlog(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<BacklogMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| BacklogMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });

        metrics::backlog_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new(
                    "operation",
                    if msg.is_some() { "read" } else { "read_empty" },
                ),
            ],
        );

        Ok(msg)
    }

    /// Archive a message (moves to archive table, preserves for audit).
    /// Marks the backlog item fully processed.
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        metrics::backlog_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "archive"),
            ],
        );
        Ok(())
    }

    /// Delete a message permanently (drop without audit trail).
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        metrics::backlog_operations().add(
            1,
            &[
                KeyValue::new("queue", queue_name.to_string()),
                KeyValue::new("operation", "delete"),
            ],
        );
        Ok(())
    }
}
