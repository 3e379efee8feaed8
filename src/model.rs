//! Core data model.
//!
//! A page is a monitored URL. Each capture of it is a snapshot; the
//! structural difference between a snapshot and its nearest earlier
//! sibling is a diff. Diffs get a priority score and flow to reviewers,
//! who record annotations. All values here are immutable rows — updates
//! happen by insert (annotations) or idempotent replace (priorities).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

entity_id!(PageId);
entity_id!(SnapshotId);
entity_id!(DiffId);
entity_id!(AnnotationId);

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// A monitored URL tracked over time. One row per distinct URL;
/// metadata fields are operator-editable, the URL is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub url: String,
    pub title: Option<String>,
    /// Agency responsible for the page (e.g., "EPA").
    pub agency: Option<String>,
    /// Site grouping within an agency (e.g., "epa.gov/climate").
    pub site: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Editable page metadata, applied as a whole on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub agency: Option<String>,
    pub site: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One timestamped capture of a page's content. Immutable after
/// ingestion. `capture_time` ordering within a page defines ancestry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub page_id: PageId,
    pub capture_time: DateTime<Utc>,
    /// Opaque reference to the stored HTML (URL or storage path). The
    /// payload itself lives in content storage, never in this row.
    pub content_ref: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// The computed structural difference between a snapshot and its
/// ancestor. Both snapshots belong to the same page and the ancestor's
/// capture_time is strictly earlier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    pub id: DiffId,
    /// SHA-256 hex digest of the diff payload.
    pub content_hash: String,
    pub from_snapshot: SnapshotId,
    pub to_snapshot: SnapshotId,
    /// Opaque reference to the stored diff payload.
    pub result_ref: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Review priority for a diff. One row per diff; rescoring replaces
/// the score but keeps the original `assigned_at` so FIFO tie-break
/// order stays stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    pub diff_id: DiffId,
    pub score: f64,
    pub assigned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Exclusive assignment of a diff to one reviewer. At most one lease
/// per diff and one per user, enforced by the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub diff_id: DiffId,
    pub user_id: String,
    pub leased_at: DateTime<Utc>,
}

/// A checked-out unit of review work: the diff plus its priority and
/// lease, as returned by `checkout_next`.
#[derive(Debug, Clone)]
pub struct ReviewItem {
    pub diff: Diff,
    pub priority: Priority,
    pub lease: Lease,
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// A reviewer's recorded judgment about a diff. Append-only; many per
/// diff. The payload shape is owned by the review front-end, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub diff_id: DiffId,
    pub user_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_round_trip_through_strings() {
        let id = DiffId::new();
        let parsed: DiffId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_ids_are_distinct() {
        assert_ne!(SnapshotId::new(), SnapshotId::new());
    }
}
