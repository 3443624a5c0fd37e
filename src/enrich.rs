//! The chunk orchestrator: one enrichment job, chunk by chunk.
//!
//! ## Pipeline
//!
//! ```text
//! books/raw/{id}.pdf ─▶ validate ─▶ chunk plan ─▶ for each chunk i ≥ start:
//!     extract [i·C, i·C+C) ─▶ LLM ─▶ parse ─▶ remap pages ─▶ merge+persist ─▶ progress
//! ```
//!
//! Chunks run strictly in order. Every completed chunk is persisted before
//! the next one starts, so a job that dies at chunk `k` keeps chunks
//! `0..k` and can be resumed with `resume_from_page_index = k·C - 1`.
//!
//! Every blob-store call runs under `store_timeout_secs`. Reads are also
//! abandoned when the job is cancelled; writes are not, they either land or
//! time out.

use crate::config::EnrichConfig;
use crate::error::{ApiError, EnrichError, ExtractionError, StoreError};
use crate::output::{EnrichmentResult, StructuredPage};
use crate::pipeline::llm::{GenerateTransport, LlmClient, RetryPolicy};
use crate::pipeline::merge::merge;
use crate::pipeline::parse::{parse, parse_truncated};
use crate::pipeline::split::{chunk_bounds, chunk_count, resume_chunk, SourceDocument};
use crate::progress::{JobState, NoopProgressCallback, ProgressCallback};
use crate::prompts::{build_prompt, BookContext};
use crate::schema::response_schema;
use crate::store::{result_key, source_key, validate_book_id, BlobStore, PersistStats, ResultStore};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a job for a book would do, without calling the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub book_id: String,
    pub total_pages: usize,
    pub byte_len: usize,
    pub chunk_size: usize,
    pub total_chunks: usize,
    /// Last processed page index recorded with the stored result, `-1` if none.
    pub resume_cursor: i64,
    /// Chunk a resume from `resume_cursor` would start at.
    pub next_chunk: usize,
    pub has_result: bool,
}

/// Runs enrichment jobs against a source store, a result store and a model.
///
/// One `Enricher` can serve many books concurrently; jobs share nothing but
/// the result store, whose keys are partitioned per book.
pub struct Enricher {
    config: EnrichConfig,
    source: Arc<dyn BlobStore>,
    results: ResultStore,
    client: LlmClient,
    cancel: CancellationToken,
}

impl Enricher {
    /// Enricher talking HTTP to the configured model endpoint.
    pub fn new(
        config: EnrichConfig,
        source: Arc<dyn BlobStore>,
        results: Arc<dyn BlobStore>,
    ) -> Result<Self, EnrichError> {
        if config.api_key.trim().is_empty() {
            return Err(EnrichError::InvalidConfig(
                "api_key is required to call the model endpoint".into(),
            ));
        }
        config.validate()?;
        let client = LlmClient::from_config(&config)
            .map_err(|e| EnrichError::InvalidConfig(format!("HTTP client setup failed: {e}")))?;
        Self::with_client(config, source, results, client)
    }

    /// Enricher over a custom transport, using the config's retry policy.
    pub fn with_transport(
        config: EnrichConfig,
        source: Arc<dyn BlobStore>,
        results: Arc<dyn BlobStore>,
        transport: Arc<dyn GenerateTransport>,
    ) -> Result<Self, EnrichError> {
        let client = LlmClient::new(transport, RetryPolicy::from_config(&config));
        Self::with_client(config, source, results, client)
    }

    pub fn with_client(
        config: EnrichConfig,
        source: Arc<dyn BlobStore>,
        results: Arc<dyn BlobStore>,
        client: LlmClient,
    ) -> Result<Self, EnrichError> {
        config.validate()?;
        let cancel = CancellationToken::new();
        Ok(Self {
            config,
            source,
            results: ResultStore::new(results),
            client: client.with_cancellation(cancel.clone()),
            cancel,
        })
    }

    /// Share `token` with the caller; cancelling it aborts running jobs.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.client = self.client.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    pub fn result_store(&self) -> &ResultStore {
        &self.results
    }

    /// Load and validate the source PDF and report the chunk plan.
    pub async fn inspect(&self, book_id: &str) -> Result<InspectReport, EnrichError> {
        let source = self.load_source(book_id).await?;
        let key = result_key(book_id);
        let resume_cursor = self
            .read(book_id, None, "metadata", &key, self.results.resume_cursor(book_id))
            .await?;
        let has_result = self
            .read(book_id, None, "exists", &key, self.results.exists(book_id))
            .await?;
        let chunk_size = self.config.chunk_size;

        Ok(InspectReport {
            book_id: book_id.to_string(),
            total_pages: source.page_count(),
            byte_len: source.byte_len(),
            chunk_size,
            total_chunks: chunk_count(source.page_count(), chunk_size),
            resume_cursor,
            next_chunk: resume_chunk(resume_cursor, chunk_size),
            has_result,
        })
    }

    /// Enrich `book_id`, starting after `resume_from_page_index` (`-1` = fresh).
    ///
    /// Every processed chunk is merged into the result store immediately.
    /// On error, chunks completed before the failure stay persisted.
    pub async fn enrich(
        &self,
        book_id: &str,
        resume_from_page_index: i64,
        context: &BookContext,
        progress: Option<ProgressCallback>,
    ) -> Result<EnrichmentResult, EnrichError> {
        let progress: ProgressCallback = progress.unwrap_or_else(|| Arc::new(NoopProgressCallback));
        let job = Job {
            enricher: self,
            book_id,
            progress: &progress,
            started: Instant::now(),
        };
        job.set_state(JobState::Idle);

        match job.run(resume_from_page_index, context).await {
            Ok(result) => {
                job.set_state(JobState::Succeeded);
                progress.on_job_complete(&result);
                info!(
                    "Enriched '{}': {} pages, {} chunks processed, {} skipped, {} tokens in {}ms{}",
                    book_id,
                    result.pages.len(),
                    result.chunks_processed,
                    result.chunks_skipped,
                    result.total_tokens,
                    result.duration_ms,
                    if result.was_truncated { " (truncated output)" } else { "" }
                );
                Ok(result)
            }
            Err(e) => {
                job.set_state(JobState::Failed);
                error!("Enrichment of '{}' failed: {}", book_id, e);
                Err(e)
            }
        }
    }

    async fn load_source(&self, book_id: &str) -> Result<SourceDocument, EnrichError> {
        validate_book_id(book_id)?;
        let key = source_key(book_id);
        let bytes = self
            .read(book_id, None, "get", &key, self.source.get(&key))
            .await?
            .ok_or_else(|| EnrichError::SourceNotFound {
                book_id: book_id.to_string(),
                key: key.clone(),
            })?;

        if bytes.is_empty() {
            return Err(EnrichError::EmptyPdf {
                book_id: book_id.to_string(),
            });
        }
        let limit = self.config.max_pdf_size_bytes();
        if bytes.len() > limit {
            return Err(EnrichError::PdfTooLarge {
                book_id: book_id.to_string(),
                size_bytes: bytes.len(),
                limit_bytes: limit,
            });
        }

        let document = SourceDocument::load_async(Arc::new(bytes))
            .await
            .map_err(|source| EnrichError::InvalidPdf {
                book_id: book_id.to_string(),
                source,
            })?;

        match document.page_count() {
            0 => Err(EnrichError::InvalidPdf {
                book_id: book_id.to_string(),
                source: ExtractionError::EmptyRange { start: 0, end: 0 },
            }),
            n if n > self.config.max_pages => Err(EnrichError::TooManyPages {
                book_id: book_id.to_string(),
                pages: n,
                limit: self.config.max_pages,
            }),
            n => {
                debug!("Loaded '{}': {} pages, {} bytes", key, n, document.byte_len());
                Ok(document)
            }
        }
    }

    /// Run a store call under the store deadline.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                key: key.to_string(),
                secs: self.config.store_timeout_secs,
            }),
        }
    }

    /// [`Self::bounded`], abandoned as soon as the job is cancelled.
    async fn read<T>(
        &self,
        book_id: &str,
        chunk: Option<usize>,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, EnrichError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EnrichError::Cancelled {
                book_id: book_id.to_string(),
                chunk,
            }),
            result = self.bounded(operation, key, call) => result.map_err(|source| EnrichError::Store {
                book_id: book_id.to_string(),
                source,
            }),
        }
    }
}

/// Per-invocation state shared by the job's steps.
struct Job<'a> {
    enricher: &'a Enricher,
    book_id: &'a str,
    progress: &'a ProgressCallback,
    started: Instant,
}

impl Job<'_> {
    fn set_state(&self, state: JobState) {
        debug!("Job '{}' → {}", self.book_id, state);
        self.progress.on_state_change(state);
    }

    fn cancelled(&self, chunk: Option<usize>) -> EnrichError {
        EnrichError::Cancelled {
            book_id: self.book_id.to_string(),
            chunk,
        }
    }

    fn store_error(&self, source: StoreError) -> EnrichError {
        EnrichError::Store {
            book_id: self.book_id.to_string(),
            source,
        }
    }

    async fn run(
        &self,
        resume_from_page_index: i64,
        context: &BookContext,
    ) -> Result<EnrichmentResult, EnrichError> {
        let enricher = self.enricher;
        let book_id = self.book_id;
        let chunk_size = enricher.config.chunk_size;

        if enricher.cancel.is_cancelled() {
            return Err(self.cancelled(None));
        }

        // ── Load and validate the source ─────────────────────────────────
        self.set_state(JobState::LoadingSource);
        let source = enricher.load_source(book_id).await?;
        let total_pages = source.page_count();

        // ── Chunk plan ───────────────────────────────────────────────────
        self.set_state(JobState::ComputingChunks);
        let total_chunks = chunk_count(total_pages, chunk_size);
        let start_chunk = resume_chunk(resume_from_page_index, chunk_size).min(total_chunks);
        info!(
            "Book '{}': {} pages → {} chunks of {} (starting at chunk {})",
            book_id, total_pages, total_chunks, chunk_size, start_chunk
        );

        let mut pages = if start_chunk > 0 {
            self.resumed_pages(start_chunk * chunk_size).await?
        } else {
            Vec::new()
        };
        self.progress.on_job_start(total_pages, total_chunks, start_chunk);

        let prompt = build_prompt(context);
        let schema = response_schema();
        let mut total_tokens = 0u64;
        let mut truncated_chunks = Vec::new();
        let mut chunks_processed = 0usize;

        // ── Chunk loop ───────────────────────────────────────────────────
        for chunk in start_chunk..total_chunks {
            if enricher.cancel.is_cancelled() {
                return Err(self.cancelled(Some(chunk)));
            }
            self.set_state(JobState::ProcessingChunk(chunk));
            self.progress.on_chunk_start(chunk, total_chunks);

            let (start, end) = chunk_bounds(chunk, chunk_size, total_pages);
            debug!("Chunk {}/{}: pages [{}, {})", chunk + 1, total_chunks, start, end);

            let document = source
                .extract_async(start, end)
                .await
                .map_err(|source| EnrichError::Extraction {
                    book_id: book_id.to_string(),
                    chunk,
                    source,
                })?;

            let response = enricher
                .client
                .send(
                    Arc::new(document),
                    &prompt,
                    &schema,
                    enricher.config.temperature,
                    enricher.config.max_output_tokens,
                )
                .await
                .map_err(|source| match source {
                    ApiError::Cancelled { .. } => self.cancelled(Some(chunk)),
                    source => EnrichError::Api {
                        book_id: book_id.to_string(),
                        chunk,
                        source,
                    },
                })?;
            total_tokens += response.usage.total_tokens;

            if response.is_truncated() {
                warn!(
                    "Chunk {} of '{}' hit the {}-token output ceiling; extraction may be incomplete \
                     (consider a smaller chunk size)",
                    chunk, book_id, enricher.config.max_output_tokens
                );
                truncated_chunks.push(chunk);
                self.progress.on_chunk_truncated(chunk);
            }

            let local = self.parse_response(&response.text, response.is_truncated(), chunk)?;
            let absolute = remap_pages(local, start, end - start, chunk);
            pages = merge(&pages, &absolute);

            // ── Persist before moving on ─────────────────────────────────
            self.set_state(JobState::Persisting(chunk));
            let key = result_key(book_id);
            let stored = enricher
                .read(book_id, Some(chunk), "load", &key, enricher.results.load(book_id))
                .await?
                .unwrap_or_default();
            let stats = PersistStats {
                duration_ms: self.started.elapsed().as_millis() as u64,
                total_tokens,
                was_truncated: !truncated_chunks.is_empty(),
                last_page_index: Some(end as i64 - 1),
            };
            // Deadline only: a write that has started is not abandoned on cancel.
            enricher
                .bounded(
                    "persist",
                    &key,
                    enricher
                        .results
                        .persist_with_stats(book_id, &merge(&stored, &absolute), &stats),
                )
                .await
                .map_err(|e| self.store_error(e))?;
            chunks_processed += 1;

            info!(
                "Chunk {}/{} of '{}' done: {} pages kept, {} tokens, {} attempt(s)",
                chunk + 1,
                total_chunks,
                book_id,
                absolute.len(),
                response.usage.total_tokens,
                response.attempts
            );
            self.progress.on_chunk_complete(end, total_pages);
        }

        self.set_state(JobState::Done);
        Ok(EnrichmentResult {
            book_id: book_id.to_string(),
            pages,
            duration_ms: self.started.elapsed().as_millis() as u64,
            total_tokens,
            was_truncated: !truncated_chunks.is_empty(),
            truncated_chunks,
            chunks_processed,
            chunks_skipped: start_chunk,
            total_source_pages: total_pages,
        })
    }

    /// Decode a chunk's model output.
    ///
    /// Output cut off at the token ceiling keeps its complete pages; anything
    /// else must parse strictly.
    fn parse_response(
        &self,
        text: &str,
        truncated: bool,
        chunk: usize,
    ) -> Result<Vec<StructuredPage>, EnrichError> {
        let parse_error = |source| EnrichError::Parse {
            book_id: self.book_id.to_string(),
            chunk,
            source,
        };
        match parse(text) {
            Ok(pages) => Ok(pages),
            Err(e) if truncated => {
                let pages = parse_truncated(text).map_err(parse_error)?;
                warn!(
                    "Chunk {} of '{}': output is cut off ({}); kept {} complete pages",
                    chunk,
                    self.book_id,
                    e,
                    pages.len()
                );
                Ok(pages)
            }
            Err(e) => Err(parse_error(e)),
        }
    }

    /// Pages of already completed chunks, taken from the stored result.
    async fn resumed_pages(&self, up_to_page: usize) -> Result<Vec<StructuredPage>, EnrichError> {
        let enricher = self.enricher;
        let stored = enricher
            .read(
                self.book_id,
                None,
                "load",
                &result_key(self.book_id),
                enricher.results.load(self.book_id),
            )
            .await?;
        match stored {
            Some(pages) => {
                let kept: Vec<StructuredPage> = pages
                    .into_iter()
                    .filter(|p| (p.page_number as usize) <= up_to_page)
                    .collect();
                debug!(
                    "Resuming '{}' with {} stored pages up to page {}",
                    self.book_id,
                    kept.len(),
                    up_to_page
                );
                Ok(kept)
            }
            None => {
                warn!(
                    "Resuming '{}' past page {} but no stored result exists; \
                     skipped chunks will be missing from the result",
                    self.book_id, up_to_page
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Map chunk-local page numbers (1-based) to absolute ones.
///
/// A local page `L` of a chunk starting at zero-based page `chunk_start`
/// becomes page `chunk_start + L`. Pages the model numbered outside
/// `1..=chunk_len` are dropped.
fn remap_pages(
    pages: Vec<StructuredPage>,
    chunk_start: usize,
    chunk_len: usize,
    chunk: usize,
) -> Vec<StructuredPage> {
    pages
        .into_iter()
        .filter_map(|mut page| {
            let local = page.page_number as usize;
            if local == 0 || local > chunk_len {
                warn!(
                    "Chunk {}: model reported page {} outside 1..={}; dropping it",
                    chunk, local, chunk_len
                );
                return None;
            }
            page.renumber((chunk_start + local) as u32);
            Some(page)
        })
        .collect()
}
