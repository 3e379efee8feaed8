//! Page and snapshot operations: URL-deduped page creation, snapshot
//! ingestion with transactional backlog enqueue, ancestor lookup.

use crate::error::{Error, Result};
use crate::model::{Page, PageId, PageMetadata, Snapshot, SnapshotId};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::backlog::{SNAPSHOT_BACKLOG, SNAPSHOT_READY};

/// Result of ingesting a page URL.
#[derive(Debug)]
pub enum PageResult {
    /// No page existed for this URL; one was created.
    Created(Page),
    /// The URL was already monitored; the existing page is returned.
    Existing(Page),
}

impl PageResult {
    pub fn page(&self) -> &Page {
        match self {
            PageResult::Created(p) | PageResult::Existing(p) => p,
        }
    }
}

impl super::Db {
    /// Get the page for a URL, creating it if absent. The unique index
    /// on `url` makes this safe under concurrent ingestion: the loser
    /// of a concurrent insert observes the winner's row.
    pub async fn get_or_create_page(&self, url: &str, meta: PageMetadata) -> Result<PageResult> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        let inserted: Option<PageRow> = sqlx::query_as(
            "INSERT INTO pages (id, url, title, agency, site, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (url) DO NOTHING
             RETURNING id, url, title, agency, site, created_at",
        )
        .bind(id)
        .bind(url)
        .bind(&meta.title)
        .bind(&meta.agency)
        .bind(&meta.site)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            metrics::pages_created().add(1, &[KeyValue::new("result", "created")]);
            return Ok(PageResult::Created(row.into_page()));
        }

        let row: PageRow = sqlx::query_as(
            "SELECT id, url, title, agency, site, created_at FROM pages WHERE url = $1",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;

        metrics::pages_created().add(1, &[KeyValue::new("result", "existing")]);
        Ok(PageResult::Existing(row.into_page()))
    }

    /// Get a page by ID.
    pub async fn get_page(&self, id: PageId) -> Result<Page> {
        let row: Option<PageRow> = sqlx::query_as(
            "SELECT id, url, title, agency, site, created_at FROM pages WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PageRow::into_page)
            .ok_or_else(|| Error::NotFound(format!("page {id}")))
    }

    /// List all monitored pages, oldest first.
    pub async fn list_pages(&self, limit: i64) -> Result<Vec<Page>> {
        let rows: Vec<PageRow> = sqlx::query_as(
            "SELECT id, url, title, agency, site, created_at
             FROM pages ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PageRow::into_page).collect())
    }

    /// Replace a page's editable metadata. The URL is immutable.
    pub async fn update_page_metadata(&self, id: PageId, meta: PageMetadata) -> Result<Page> {
        let row: Option<PageRow> = sqlx::query_as(
            "UPDATE pages SET title = $1, agency = $2, site = $3
             WHERE id = $4
             RETURNING id, url, title, agency, site, created_at",
        )
        .bind(&meta.title)
        .bind(&meta.agency)
        .bind(&meta.site)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PageRow::into_page)
            .ok_or_else(|| Error::NotFound(format!("page {id}")))
    }

    /// Ingest a new snapshot. Inserts the row, enqueues its id on the
    /// snapshot backlog, and fires NOTIFY — all in one transaction, so
    /// a snapshot can never exist without its backlog entry.
    pub async fn insert_snapshot(
        &self,
        page_id: PageId,
        capture_time: chrono::DateTime<chrono::Utc>,
        content_ref: &str,
    ) -> Result<Snapshot> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO snapshots (id, page_id, capture_time, content_ref, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(page_id.0)
        .bind(capture_time)
        .bind(content_ref)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                Error::NotFound(format!("page {page_id}"))
            }
            other => Error::Database(other),
        })?;

        let payload = serde_json::json!({ "snapshot_id": id });
        sqlx::query("SELECT pgmq.send($1, $2, $3)")
            .bind(SNAPSHOT_BACKLOG)
            .bind(&payload)
            .bind(0i32)
            .fetch_one(&mut *tx)
            .await?;

        // NOTIFY is transactional — only fires on commit
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(SNAPSHOT_READY)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::snapshots_ingested().add(1, &[]);

        self.get_snapshot(SnapshotId(id)).await
    }

    /// Get a snapshot by ID.
    pub async fn get_snapshot(&self, id: SnapshotId) -> Result<Snapshot> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT id, page_id, capture_time, content_ref, created_at
             FROM snapshots WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SnapshotRow::into_snapshot)
            .ok_or_else(|| Error::NotFound(format!("snapshot {id}")))
    }

    /// List a page's snapshots in capture order.
    pub async fn list_snapshots(&self, page_id: PageId) -> Result<Vec<Snapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT id, page_id, capture_time, content_ref, created_at
             FROM snapshots WHERE page_id = $1 ORDER BY capture_time ASC",
        )
        .bind(page_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SnapshotRow::into_snapshot).collect())
    }

    /// Find the nearest earlier snapshot of the same page: greatest
    /// capture_time strictly less than the given one. None means the
    /// snapshot is the first observation of its page.
    pub async fn find_ancestor(
        &self,
        page_id: PageId,
        capture_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Snapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT id, page_id, capture_time, content_ref, created_at
             FROM snapshots
             WHERE page_id = $1 AND capture_time < $2
             ORDER BY capture_time DESC
             LIMIT 1",
        )
        .bind(page_id.0)
        .bind(capture_time)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SnapshotRow::into_snapshot))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct PageRow {
    id: Uuid,
    url: String,
    title: Option<String>,
    agency: Option<String>,
    site: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl PageRow {
    fn into_page(self) -> Page {
        Page {
            id: PageId(self.id),
            url: self.url,
            title: self.title,
            agency: self.agency,
            site: self.site,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    page_id: Uuid,
    capture_time: chrono::DateTime<chrono::Utc>,
    content_ref: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Snapshot {
        Snapshot {
            id: SnapshotId(self.id),
            page_id: PageId(self.page_id),
            capture_time: self.capture_time,
            content_ref: self.content_ref,
            created_at: self.created_at,
        }
    }
}
