//! Diff and priority operations: idempotent diff insertion with
//! transactional backlog enqueue, last-write-wins priority upsert.

use crate::error::{Error, Result};
use crate::model::{Diff, DiffId, PageId, Priority, SnapshotId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::backlog::{DIFF_BACKLOG, DIFF_READY};

/// Result of persisting a computed diff.
#[derive(Debug)]
pub enum DiffResult {
    /// New diff row created and enqueued for priority assignment.
    Created(Diff),
    /// A diff for this snapshot pair already existed — a redelivered
    /// backlog message reprocessed the snapshot. Nothing re-enqueued.
    Existing(Diff),
}

impl DiffResult {
    pub fn diff(&self) -> &Diff {
        match self {
            DiffResult::Created(d) | DiffResult::Existing(d) => d,
        }
    }
}

impl super::Db {
    /// Persist a computed diff linking `from_snapshot` to
    /// `to_snapshot`, enqueueing it on the diff backlog in the same
    /// transaction. The pair must span the same page with the `from`
    /// capture strictly earlier. Idempotent on the snapshot pair:
    /// at-least-once backlog delivery can invoke the pipeline twice
    /// for one snapshot without producing duplicate rows or duplicate
    /// backlog entries.
    pub async fn insert_diff(
        &self,
        from_snapshot: SnapshotId,
        to_snapshot: SnapshotId,
        content_hash: &str,
        result_ref: &str,
    ) -> Result<DiffResult> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let pair: Option<(bool, bool)> = sqlx::query_as(
            "SELECT sf.page_id = st.page_id, sf.capture_time < st.capture_time
             FROM snapshots sf
             JOIN snapshots st ON st.id = $2
             WHERE sf.id = $1",
        )
        .bind(from_snapshot.0)
        .bind(to_snapshot.0)
        .fetch_optional(&mut *tx)
        .await?;

        let (same_page, ordered) = pair.ok_or_else(|| {
            Error::NotFound(format!("snapshot pair {from_snapshot} → {to_snapshot}"))
        })?;
        if !same_page {
            return Err(Error::InvalidPair(format!(
                "snapshots {from_snapshot} and {to_snapshot} belong to different pages"
            )));
        }
        if !ordered {
            return Err(Error::InvalidPair(format!(
                "snapshot {from_snapshot} does not precede {to_snapshot}"
            )));
        }

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO diffs (id, content_hash, from_snapshot, to_snapshot, result_ref, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (from_snapshot, to_snapshot) DO NOTHING
             RETURNING id",
        )
        .bind(id)
        .bind(content_hash)
        .bind(from_snapshot.0)
        .bind(to_snapshot.0)
        .bind(result_ref)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            // Duplicate pair — the original insert already enqueued it.
            tx.commit().await?;
            let existing = self.get_diff_for_pair(from_snapshot, to_snapshot).await?;
            metrics::diffs_persisted().add(1, &[KeyValue::new("result", "duplicate")]);
            return Ok(DiffResult::Existing(existing));
        }

        let payload = serde_json::json!({ "diff_id": id });
        sqlx::query("SELECT pgmq.send($1, $2, $3)")
            .bind(DIFF_BACKLOG)
            .bind(&payload)
            .bind(0i32)
            .fetch_one(&mut *tx)
            .await?;

        // NOTIFY is transactional — only fires on commit
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(DIFF_READY)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::diffs_persisted().add(1, &[KeyValue::new("result", "created")]);

        let diff = self.get_diff(DiffId(id)).await?;
        Ok(DiffResult::Created(diff))
    }

    /// Get a diff by ID.
    pub async fn get_diff(&self, id: DiffId) -> Result<Diff> {
        let row: Option<DiffRow> = sqlx::query_as(
            "SELECT id, content_hash, from_snapshot, to_snapshot, result_ref, created_at
             FROM diffs WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DiffRow::into_diff)
            .ok_or_else(|| Error::NotFound(format!("diff {id}")))
    }

    async fn get_diff_for_pair(&self, from: SnapshotId, to: SnapshotId) -> Result<Diff> {
        let row: DiffRow = sqlx::query_as(
            "SELECT id, content_hash, from_snapshot, to_snapshot, result_ref, created_at
             FROM diffs WHERE from_snapshot = $1 AND to_snapshot = $2",
        )
        .bind(from.0)
        .bind(to.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_diff())
    }

    /// List a page's diffs in the capture order of their target
    /// snapshot.
    pub async fn list_diffs(&self, page_id: PageId) -> Result<Vec<Diff>> {
        let rows: Vec<DiffRow> = sqlx::query_as(
            "SELECT d.id, d.content_hash, d.from_snapshot, d.to_snapshot, d.result_ref, d.created_at
             FROM diffs d
             JOIN snapshots s ON s.id = d.to_snapshot
             WHERE s.page_id = $1
             ORDER BY s.capture_time ASC",
        )
        .bind(page_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DiffRow::into_diff).collect())
    }

    /// Persist a priority score for a diff. One row per diff: a rescore
    /// replaces the score but keeps the original assigned_at, so FIFO
    /// ordering among equal scores is stable across recomputation.
    pub async fn upsert_priority(&self, diff_id: DiffId, score: f64) -> Result<Priority> {
        let now = chrono::Utc::now();

        let row: Option<PriorityRow> = sqlx::query_as(
            "INSERT INTO priorities (diff_id, score, assigned_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (diff_id) DO UPDATE SET score = EXCLUDED.score
             RETURNING diff_id, score, assigned_at",
        )
        .bind(diff_id.0)
        .bind(score)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                Error::NotFound(format!("diff {diff_id}"))
            }
            other => Error::Database(other),
        })?;

        metrics::priorities_assigned().add(1, &[]);

        row.map(PriorityRow::into_priority)
            .ok_or_else(|| Error::NotFound(format!("diff {diff_id}")))
    }

    /// Get the priority for a diff, if one has been assigned.
    pub async fn get_priority(&self, diff_id: DiffId) -> Result<Option<Priority>> {
        let row: Option<PriorityRow> = sqlx::query_as(
            "SELECT diff_id, score, assigned_at FROM priorities WHERE diff_id = $1",
        )
        .bind(diff_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PriorityRow::into_priority))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct DiffRow {
    id: Uuid,
    content_hash: String,
    from_snapshot: Uuid,
    to_snapshot: Uuid,
    result_ref: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl DiffRow {
    fn into_diff(self) -> Diff {
        Diff {
            id: DiffId(self.id),
            content_hash: self.content_hash,
            from_snapshot: SnapshotId(self.from_snapshot),
            to_snapshot: SnapshotId(self.to_snapshot),
            result_ref: self.result_ref,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PriorityRow {
    diff_id: Uuid,
    score: f64,
    assigned_at: chrono::DateTime<chrono::Utc>,
}

impl PriorityRow {
    fn into_priority(self) -> Priority {
        Priority {
            diff_id: DiffId(self.diff_id),
            score: self.score,
            assigned_at: self.assigned_at,
        }
    }
}
