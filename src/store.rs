//! Durable storage: a byte-blob store port and the result store built on it.
//!
//! The enrichment core only needs get/put/exists on opaque blobs, so the
//! object-storage client is consumed through the [`BlobStore`] trait. Two
//! implementations ship with the crate:
//!
//! * [`MemoryBlobStore`]: a process-local map, for tests and embedding.
//! * [`LocalBlobStore`]: a directory tree; writes go to a temp file first
//!   and are renamed into place, so readers never see a half-written blob.
//!
//! Keys are partitioned per book ([`source_key`], [`result_key`]), which is
//! what keeps concurrent jobs for different books apart. Concurrent writers
//! to the same book are not supported; the last write wins.

use crate::error::{EnrichError, StoreError};
use crate::output::StructuredPage;
use crate::pipeline::merge::merge;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Side metadata stored next to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Minimal object-storage port.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bytes under `key`, or `None` if nothing is stored there.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `bytes` under `key`, replacing any previous blob and metadata.
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Metadata stored with the blob, or `None` when there is no blob.
    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>, StoreError>;
}

/// `books/raw/{book_id}.pdf`
pub fn source_key(book_id: &str) -> String {
    format!("books/raw/{book_id}.pdf")
}

/// `batch/structured/{book_id}-structured.json`
pub fn result_key(book_id: &str) -> String {
    format!("batch/structured/{book_id}-structured.json")
}

/// Refuse ids that would escape their key prefix.
pub fn validate_book_id(book_id: &str) -> Result<(), EnrichError> {
    let bad = book_id.trim().is_empty()
        || book_id.contains('/')
        || book_id.contains('\\')
        || book_id.contains("..");
    if bad {
        Err(EnrichError::InvalidBookId(book_id.to_string()))
    } else {
        Ok(())
    }
}

// ── In-memory store ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, BlobMetadata)>>,
    puts: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob without going through the async API.
    pub fn with_blob(self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.lock_blobs()
            .insert(key.into(), (bytes, BlobMetadata::new()));
        self
    }

    /// Keys written through [`BlobStore::put`], in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.puts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, BlobMetadata)>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock_blobs().get(key).map(|(b, _)| b.clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<(), StoreError> {
        self.lock_blobs().insert(key.to_string(), (bytes, metadata));
        self.puts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock_blobs().contains_key(key))
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>, StoreError> {
        Ok(self.lock_blobs().get(key).map(|(_, m)| m.clone()))
    }
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// Blobs as files under `root`; metadata in a `<file>.meta.json` sidecar.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "key escapes the store root"),
            });
        }
        Ok(self.root.join(relative))
    }

    fn sidecar(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        path.with_file_name(name)
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write_atomic(key: &str, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::write_atomic(key, &path, &bytes).await?;
        let meta = serde_json::to_vec_pretty(&metadata).map_err(StoreError::Serialize)?;
        Self::write_atomic(key, &Self::sidecar(&path), &meta).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>, StoreError> {
        let path = self.path_for(key)?;
        if !self.exists(key).await? {
            return Ok(None);
        }
        match tokio::fs::read(Self::sidecar(&path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            // Blob written by something other than this store.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Some(BlobMetadata::new())),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

// ── Result store ─────────────────────────────────────────────────────────

/// Metadata tag identifying documents written by this pipeline.
pub const SOURCE_TAG: &str = "llm-chunked-enrichment";

/// Job figures recorded as side metadata with each write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub duration_ms: u64,
    pub total_tokens: u64,
    pub was_truncated: bool,
    /// Zero-based index of the last source page covered so far.
    pub last_page_index: Option<i64>,
}

/// The cumulative structured document per book; single writer of record.
#[derive(Clone)]
pub struct ResultStore {
    blobs: Arc<dyn BlobStore>,
}

impl ResultStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Stored pages, or `None` when the book has no result yet.
    pub async fn load(&self, book_id: &str) -> Result<Option<Vec<StructuredPage>>, StoreError> {
        let key = result_key(book_id);
        let Some(bytes) = self.blobs.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { key, source })
    }

    pub async fn exists(&self, book_id: &str) -> Result<bool, StoreError> {
        self.blobs.exists(&result_key(book_id)).await
    }

    /// Overwrite the stored document with `pages` (sorted, unique by number).
    pub async fn persist(&self, book_id: &str, pages: &[StructuredPage]) -> Result<String, StoreError> {
        self.persist_with_stats(book_id, pages, &PersistStats::default())
            .await
    }

    pub async fn persist_with_stats(
        &self,
        book_id: &str,
        pages: &[StructuredPage],
        stats: &PersistStats,
    ) -> Result<String, StoreError> {
        let normalized = merge(&[], pages);
        self.write(book_id, &normalized, stats).await
    }

    /// Merge `new_pages` into the stored document and write it back.
    ///
    /// [`crate::Enricher`] runs the load and the write as separate steps,
    /// each under the store deadline.
    pub async fn merge_and_persist(
        &self,
        book_id: &str,
        new_pages: &[StructuredPage],
    ) -> Result<String, StoreError> {
        let existing = self.load(book_id).await?.unwrap_or_default();
        let merged = merge(&existing, new_pages);
        debug!(
            "Merging {} pages into {} stored for '{}' → {}",
            new_pages.len(),
            existing.len(),
            book_id,
            merged.len()
        );
        self.write(book_id, &merged, &PersistStats::default()).await
    }

    /// Last processed page index recorded with the stored document, `-1` if none.
    pub async fn resume_cursor(&self, book_id: &str) -> Result<i64, StoreError> {
        let metadata = self.blobs.get_metadata(&result_key(book_id)).await?;
        Ok(metadata
            .and_then(|m| m.get("last-page-index").and_then(|v| v.parse().ok()))
            .unwrap_or(-1))
    }

    async fn write(
        &self,
        book_id: &str,
        pages: &[StructuredPage],
        stats: &PersistStats,
    ) -> Result<String, StoreError> {
        let key = result_key(book_id);
        let body = serde_json::to_vec_pretty(pages).map_err(StoreError::Serialize)?;

        let mut metadata = BlobMetadata::new();
        metadata.insert("content-type".into(), "application/json".into());
        metadata.insert("book-id".into(), book_id.to_string());
        metadata.insert("source".into(), SOURCE_TAG.into());
        metadata.insert("processed-at".into(), chrono::Utc::now().to_rfc3339());
        metadata.insert("page-count".into(), pages.len().to_string());
        metadata.insert("duration-ms".into(), stats.duration_ms.to_string());
        metadata.insert("total-tokens".into(), stats.total_tokens.to_string());
        metadata.insert("was-truncated".into(), stats.was_truncated.to_string());
        if let Some(last) = stats.last_page_index {
            metadata.insert("last-page-index".into(), last.to_string());
        }

        self.blobs.put(&key, body, metadata).await?;
        info!("Persisted {} pages for '{}' to {}", pages.len(), book_id, key);
        Ok(key)
    }
}
