//! Review queue and annotations: atomic checkout under concurrency,
//! guarded checkin, append-only reviewer judgments.
//!
//! Lease state lives on the priority row itself (`leased_by`,
//! `leased_at`), so claiming is a single UPDATE and Postgres row locks
//! make selection + transition one atomic step. `FOR UPDATE SKIP
//! LOCKED` sends concurrent callers to different candidates instead of
//! blocking them on the same one.

use crate::error::{Error, Result};
use crate::model::{Annotation, AnnotationId, Diff, DiffId, Lease, Priority, ReviewItem, SnapshotId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

/// One row of the queue as seen by operators: a prioritized diff and
/// who, if anyone, currently holds it.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub diff_id: DiffId,
    pub score: f64,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
    pub leased_by: Option<String>,
    pub leased_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl super::Db {
    /// Atomically claim the highest-priority unleased diff for a user.
    ///
    /// Selection order is score descending with FIFO tie-break on
    /// priority assignment time. Returns `Ok(None)` when nothing is
    /// available — a normal result, not an error. A user who already
    /// holds a lease gets `LeaseConflict` whether or not candidates
    /// exist; the prior lease must be checked in first.
    pub async fn checkout_next(&self, user_id: &str) -> Result<Option<ReviewItem>> {
        if self.current_lease(user_id).await?.is_some() {
            metrics::review_checkouts().add(1, &[KeyValue::new("result", "conflict")]);
            return Err(Error::LeaseConflict(user_id.to_string()));
        }

        // Claim using CTE + FOR UPDATE SKIP LOCKED. Two concurrent
        // callers lock different candidate rows; a caller arriving
        // after a claim re-evaluates the leased_by guard on the
        // updated row and falls through to the next candidate. The
        // diff is joined into the same statement, so the caller either
        // receives the full item or no lease was taken.
        let claimed: Option<ClaimedRow> = sqlx::query_as(
            "WITH candidate AS (
                 SELECT diff_id
                 FROM priorities
                 WHERE leased_by IS NULL
                 ORDER BY score DESC, assigned_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             ),
             claimed AS (
                 UPDATE priorities p
                 SET leased_by = $1, leased_at = now()
                 FROM candidate c
                 WHERE p.diff_id = c.diff_id
                 RETURNING p.diff_id, p.score, p.assigned_at, p.leased_at
             )
             SELECT cl.diff_id, cl.score, cl.assigned_at, cl.leased_at,
                    d.content_hash, d.from_snapshot, d.to_snapshot,
                    d.result_ref, d.created_at
             FROM claimed cl
             JOIN diffs d ON d.id = cl.diff_id",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_checkout_error(e, user_id))?;

        let Some(row) = claimed else {
            metrics::review_checkouts().add(1, &[KeyValue::new("result", "empty")]);
            return Ok(None);
        };

        metrics::review_checkouts().add(1, &[KeyValue::new("result", "leased")]);

        Ok(Some(row.into_item(user_id)))
    }

    /// Release the lease held by a user, returning the freed diff id.
    /// The diff immediately becomes a candidate again for any user,
    /// including this one. Fails with `NoActiveLease` if the user
    /// holds nothing; no state is mutated in that case.
    pub async fn checkin(&self, user_id: &str) -> Result<DiffId> {
        let freed: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE priorities
             SET leased_by = NULL, leased_at = NULL
             WHERE leased_by = $1
             RETURNING diff_id",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match freed {
            Some((diff_id,)) => {
                metrics::review_checkins().add(1, &[KeyValue::new("result", "ok")]);
                Ok(DiffId(diff_id))
            }
            None => {
                metrics::review_checkins().add(1, &[KeyValue::new("result", "no_lease")]);
                Err(Error::NoActiveLease(user_id.to_string()))
            }
        }
    }

    /// The lease a user currently holds, if any.
    pub async fn current_lease(&self, user_id: &str) -> Result<Option<Lease>> {
        let row: Option<(Uuid, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT diff_id, leased_at FROM priorities WHERE leased_by = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(diff_id, leased_at)| Lease {
            diff_id: DiffId(diff_id),
            user_id: user_id.to_string(),
            leased_at,
        }))
    }

    /// The queue in selection order, leased entries included.
    pub async fn list_review_queue(&self, limit: i64) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT diff_id, score, assigned_at, leased_by, leased_at
             FROM priorities
             ORDER BY score DESC, assigned_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueueRow::into_entry).collect())
    }

    /// Append a reviewer's judgment against a diff. No lease check:
    /// annotating is allowed whether or not the user holds the diff.
    pub async fn insert_annotation(
        &self,
        diff_id: DiffId,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<Annotation> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let row: AnnotationRow = sqlx::query_as(
            "INSERT INTO annotations (id, diff_id, user_id, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, diff_id, user_id, payload, created_at",
        )
        .bind(id)
        .bind(diff_id.0)
        .bind(user_id)
        .bind(&payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                Error::NotFound(format!("diff {diff_id}"))
            }
            other => Error::Database(other),
        })?;

        metrics::annotations_recorded().add(1, &[]);

        Ok(row.into_annotation())
    }

    /// A diff's annotations, oldest first.
    pub async fn list_annotations(&self, diff_id: DiffId) -> Result<Vec<Annotation>> {
        let rows: Vec<AnnotationRow> = sqlx::query_as(
            "SELECT id, diff_id, user_id, payload, created_at
             FROM annotations WHERE diff_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(diff_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AnnotationRow::into_annotation).collect())
    }
}

/// Map a unique violation on the one-lease-per-user index to
/// `LeaseConflict`. Backstop for the race where two checkouts by the
/// same user both pass the lease guard; a second checkout never
/// implicitly releases the prior lease.
fn map_checkout_error(e: sqlx::Error, user_id: &str) -> Error {
    if let sqlx::Error::Database(ref db) = e
        && db.is_unique_violation()
    {
        return Error::LeaseConflict(user_id.to_string());
    }
    Error::Database(e)
}

/// Internal row types for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ClaimedRow {
    diff_id: Uuid,
    score: f64,
    assigned_at: chrono::DateTime<chrono::Utc>,
    leased_at: chrono::DateTime<chrono::Utc>,
    content_hash: String,
    from_snapshot: Uuid,
    to_snapshot: Uuid,
    result_ref: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl ClaimedRow {
    fn into_item(self, user_id: &str) -> ReviewItem {
        ReviewItem {
            diff: Diff {
                id: DiffId(self.diff_id),
                content_hash: self.content_hash,
                from_snapshot: SnapshotId(self.from_snapshot),
                to_snapshot: SnapshotId(self.to_snapshot),
                result_ref: self.result_ref,
                created_at: self.created_at,
            },
            priority: Priority {
                diff_id: DiffId(self.diff_id),
                score: self.score,
                assigned_at: self.assigned_at,
            },
            lease: Lease {
                diff_id: DiffId(self.diff_id),
                user_id: user_id.to_string(),
                leased_at: self.leased_at,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    diff_id: Uuid,
    score: f64,
    assigned_at: chrono::DateTime<chrono::Utc>,
    leased_by: Option<String>,
    leased_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl QueueRow {
    fn into_entry(self) -> QueueEntry {
        QueueEntry {
            diff_id: DiffId(self.diff_id),
            score: self.score,
            assigned_at: self.assigned_at,
            leased_by: self.leased_by,
            leased_at: self.leased_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: Uuid,
    diff_id: Uuid,
    user_id: String,
    payload: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl AnnotationRow {
    fn into_annotation(self) -> Annotation {
        Annotation {
            id: AnnotationId(self.id),
            diff_id: DiffId(self.diff_id),
            user_id: self.user_id,
            payload: self.payload,
            created_at: self.created_at,
        }
    }
}
