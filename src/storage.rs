//! Diff payload storage on disk.
//!
//! Entity rows never inline large payloads; they carry an opaque
//! reference into this store. Payloads are content-addressed under a
//! two-level hash-prefix directory layout so directories stay small.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Content-addressed store for diff payloads.
pub struct DiffStore {
    base_dir: PathBuf,
}

/// A stored payload: its SHA-256 hex digest and the reference to hand
/// to the entity row.
#[derive(Debug, Clone)]
pub struct StoredPayload {
    pub content_hash: String,
    pub result_ref: String,
}

impl DiffStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Storage path for a payload: `{base}/{hash[0..2]}/{hash}.json`.
    fn payload_path(&self, content_hash: &str) -> PathBuf {
        self.base_dir
            .join(&content_hash[..2])
            .join(format!("{content_hash}.json"))
    }

    /// Write a diff payload, returning its hash and reference. Writing
    /// the same payload twice is a no-op with the same reference.
    pub async fn store(&self, payload: &serde_json::Value) -> Result<StoredPayload> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| Error::Other(format!("unserializable diff payload: {e}")))?;
        let content_hash = hex::encode(Sha256::digest(&bytes));

        let path = self.payload_path(&content_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Other(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::Other(format!("write {}: {e}", path.display())))?;

        Ok(StoredPayload {
            content_hash,
            result_ref: path.to_string_lossy().into_owned(),
        })
    }

    /// Read a payload back through its reference.
    pub async fn load(&self, result_ref: &str) -> Result<serde_json::Value> {
        let bytes = tokio::fs::read(Path::new(result_ref))
            .await
            .map_err(|e| Error::NotFound(format!("payload {result_ref}: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Other(format!("corrupt payload {result_ref}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("pagewatch-store-{}", uuid::Uuid::new_v4()));
        let store = DiffStore::new(&dir);

        let payload = serde_json::json!({"changes": [{"op": "insert", "text": "new heading"}]});
        let stored = store.store(&payload).await.unwrap();
        assert_eq!(stored.content_hash.len(), 64);

        let loaded = store.load(&stored.result_ref).await.unwrap();
        assert_eq!(loaded, payload);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn identical_payloads_share_a_reference() {
        let dir = std::env::temp_dir().join(format!("pagewatch-store-{}", uuid::Uuid::new_v4()));
        let store = DiffStore::new(&dir);

        let payload = serde_json::json!({"changes": []});
        let a = store.store(&payload).await.unwrap();
        let b = store.store(&payload).await.unwrap();
        assert_eq!(a.result_ref, b.result_ref);
        assert_eq!(a.content_hash, b.content_hash);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
