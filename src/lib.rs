//! # book-enrich
//!
//! Turn a scanned or typeset Arabic book PDF into a structured, fully
//! vocalised (tashkeel) document with a multimodal LLM.
//!
//! The model reads the PDF itself, a chunk of pages at a time, and answers
//! with schema-constrained JSON: per page a `keepPage` flag and a list of
//! semantically typed blocks (paragraph, title, verse, footnote, …). The
//! crate normalises that into pages → blocks → words, each word carrying a
//! stable id, and splits verse lines into their two hemistichs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! books/raw/{id}.pdf
//!  │
//!  ├─ 1. Split    cut pages [i·C, i·C+C) into a standalone PDF (lopdf, spawn_blocking)
//!  ├─ 2. LLM      PDF + prompt + response schema, retry/backoff, cancellable
//!  ├─ 3. Parse    drop non-content pages, tokenise, split verse hemistichs
//!  ├─ 4. Remap    chunk-local page numbers → absolute page numbers
//!  └─ 5. Persist  merge into batch/structured/{id}-structured.json after every chunk
//! ```
//!
//! Because every chunk is persisted before the next starts, a failed job is
//! resumed by passing the last processed page index instead of `-1`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book_enrich::{BookContext, EnrichConfig, Enricher, LocalBlobStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EnrichConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .chunk_size(10)
//!         .build()?;
//!     let store = Arc::new(LocalBlobStore::new("./data"));
//!     let enricher = Enricher::new(config, store.clone(), store)?;
//!
//!     let context = BookContext {
//!         title: Some("ديوان المتنبي".into()),
//!         ..Default::default()
//!     };
//!     let result = enricher.enrich("mutanabbi", -1, &context, None).await?;
//!     eprintln!("{} pages, {} tokens", result.pages.len(), result.total_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `book-enrich` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! book-enrich = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod enrich;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnrichConfig, EnrichConfigBuilder};
pub use enrich::{Enricher, InspectReport};
pub use error::{ApiError, EnrichError, ExtractionError, ParseError, StoreError, TransportError};
pub use output::{BlockContent, EnrichmentResult, StructuredBlock, StructuredPage, Word};
pub use pipeline::llm::{GenerateRequest, GenerateResponse, GenerateTransport, LlmClient, RetryPolicy, TokenUsage};
pub use pipeline::merge::merge;
pub use pipeline::parse::{parse, parse_truncated};
pub use progress::{EnrichProgressCallback, JobState, NoopProgressCallback, ProgressCallback};
pub use prompts::BookContext;
pub use schema::BlockType;
pub use store::{BlobMetadata, BlobStore, LocalBlobStore, MemoryBlobStore, ResultStore};
pub use tokio_util::sync::CancellationToken;
