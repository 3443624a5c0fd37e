//! Page-range extraction: cut a standalone PDF out of the source document.
//!
//! The source is parsed once into a [`SourceDocument`]; each chunk clones
//! the object graph, deletes every page outside `[start, end)`, prunes the
//! objects nothing references any more and serialises the result. The
//! source itself is never mutated.
//!
//! lopdf work is CPU-bound, so the async wrappers run it inside
//! `spawn_blocking` and keep Tokio worker threads free for the LLM calls of
//! other jobs.

use crate::error::ExtractionError;
use lopdf::Document;
use std::sync::Arc;
use tracing::debug;

/// A parsed, read-only source PDF.
#[derive(Clone)]
pub struct SourceDocument {
    doc: Arc<Document>,
    page_count: usize,
    byte_len: usize,
}

impl SourceDocument {
    /// Parse PDF bytes.
    pub fn load(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let doc = Document::load_mem(bytes).map_err(|e| ExtractionError::Load(e.to_string()))?;
        let page_count = doc.get_pages().len();
        Ok(Self {
            doc: Arc::new(doc),
            page_count,
            byte_len: bytes.len(),
        })
    }

    /// [`SourceDocument::load`] on the blocking pool.
    pub async fn load_async(bytes: Arc<Vec<u8>>) -> Result<Self, ExtractionError> {
        tokio::task::spawn_blocking(move || Self::load(&bytes))
            .await
            .map_err(|e| ExtractionError::Load(format!("load task panicked: {e}")))?
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Produce a PDF containing pages `[start, end)` (zero-based) of the source.
    pub fn extract(&self, start: usize, end: usize) -> Result<Vec<u8>, ExtractionError> {
        if start >= end {
            return Err(ExtractionError::EmptyRange { start, end });
        }
        if end > self.page_count {
            return Err(ExtractionError::OutOfBounds {
                start,
                end,
                total: self.page_count,
            });
        }

        let mut chunk = (*self.doc).clone();

        // lopdf numbers pages from 1.
        let keep = (start as u32 + 1)..=(end as u32);
        let drop: Vec<u32> = chunk
            .get_pages()
            .keys()
            .copied()
            .filter(|n| !keep.contains(n))
            .collect();
        chunk.delete_pages(&drop);
        chunk.prune_objects();
        chunk.renumber_objects();

        let mut out = Vec::new();
        chunk
            .save_to(&mut out)
            .map_err(|e| ExtractionError::Save(e.to_string()))?;

        debug!(
            "Extracted pages [{}, {}) → {} bytes (source {} bytes)",
            start,
            end,
            out.len(),
            self.byte_len
        );
        Ok(out)
    }

    /// [`SourceDocument::extract`] on the blocking pool.
    pub async fn extract_async(&self, start: usize, end: usize) -> Result<Vec<u8>, ExtractionError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.extract(start, end))
            .await
            .map_err(|e| ExtractionError::Save(format!("extract task panicked: {e}")))?
    }
}

/// Zero-based `[start, end)` window of chunk `index`.
pub fn chunk_bounds(index: usize, chunk_size: usize, total_pages: usize) -> (usize, usize) {
    let start = index * chunk_size;
    (start, (start + chunk_size).min(total_pages))
}

/// `ceil(total_pages / chunk_size)`.
pub fn chunk_count(total_pages: usize, chunk_size: usize) -> usize {
    total_pages.div_ceil(chunk_size)
}

/// First chunk to process given the last fully processed zero-based page
/// index (`-1` for a fresh start).
pub fn resume_chunk(last_processed_page_index: i64, chunk_size: usize) -> usize {
    let next_page = (last_processed_page_index + 1).max(0) as usize;
    next_page / chunk_size
}
