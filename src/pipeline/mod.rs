//! Pipeline stages for chunked book enrichment.
//!
//! Each submodule implements exactly one step; the orchestrator in
//! [`crate::enrich`] strings them together per chunk.
//!
//! ## Data Flow
//!
//! ```text
//! split ──▶ llm ──▶ parse ──▶ merge
//! (lopdf)  (model)  (JSON)   (by page number)
//! ```
//!
//! 1. [`split`]: cut a page window out of the source PDF; runs in
//!    `spawn_blocking` because lopdf is CPU-bound
//! 2. [`llm`]: one model call with retry/backoff; the only stage with
//!    network I/O
//! 3. [`parse`]: decode the structured-output JSON into pages, blocks and
//!    words with reproducible ids
//! 4. [`merge`]: pure overwrite-by-page-number merge of page lists

pub mod llm;
pub mod merge;
pub mod parse;
pub mod split;
