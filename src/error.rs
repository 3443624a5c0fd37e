//! Error types for the book-enrich library.
//!
//! Failures fall into three tiers:
//!
//! * [`EnrichError`]: **Fatal** for the current job invocation. Returned as
//!   `Err(EnrichError)` from [`crate::enrich::Enricher::enrich`]. Chunks that
//!   were persisted before the failure stay in the result store, so the job
//!   can be resumed from the last completed chunk.
//!
//! * Stage errors ([`ExtractionError`], [`ApiError`], [`ParseError`],
//!   [`StoreError`]): raised by one pipeline stage and wrapped into an
//!   `EnrichError` that adds the book id and chunk index.
//!
//! * [`TransportError`]: a single failed attempt against the model endpoint.
//!   Transient ones are retried by [`crate::pipeline::llm::LlmClient`]; they
//!   only escape as the `last` cause of [`ApiError::RetriesExhausted`].
//!
//! Truncated model output is not an error at all: it is reported through
//! [`crate::output::EnrichmentResult::was_truncated`].

use thiserror::Error;

/// All fatal errors returned by an enrichment job.
#[derive(Debug, Error)]
pub enum EnrichError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No source PDF is stored under `books/raw/{book_id}.pdf`.
    #[error("Source PDF for book '{book_id}' not found at '{key}'")]
    SourceNotFound { book_id: String, key: String },

    /// The source blob exists but holds zero bytes.
    #[error("Source PDF for book '{book_id}' is empty")]
    EmptyPdf { book_id: String },

    /// The source PDF exceeds `max_pdf_size_mb`.
    #[error("Source PDF for book '{book_id}' is {size_bytes} bytes, limit is {limit_bytes} bytes")]
    PdfTooLarge {
        book_id: String,
        size_bytes: usize,
        limit_bytes: usize,
    },

    /// The source bytes are not a readable PDF, or it has no pages.
    #[error("Source PDF for book '{book_id}' is unreadable: {source}")]
    InvalidPdf {
        book_id: String,
        #[source]
        source: ExtractionError,
    },

    /// The source PDF has more pages than `max_pages`.
    #[error("Source PDF for book '{book_id}' has {pages} pages, limit is {limit}")]
    TooManyPages {
        book_id: String,
        pages: usize,
        limit: usize,
    },

    /// Book ids become storage keys; anything that could escape the key prefix is refused.
    #[error("Invalid book id '{0}': must be non-empty and contain no '/', '\\' or '..'")]
    InvalidBookId(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Chunk errors ──────────────────────────────────────────────────────
    /// The page window could not be cut out of the source PDF.
    #[error("Book '{book_id}', chunk {chunk}: page extraction failed: {source}")]
    Extraction {
        book_id: String,
        chunk: usize,
        #[source]
        source: ExtractionError,
    },

    /// The model endpoint rejected the request or never succeeded.
    #[error("Book '{book_id}', chunk {chunk}: LLM call failed: {source}")]
    Api {
        book_id: String,
        chunk: usize,
        #[source]
        source: ApiError,
    },

    /// The model answered with something that is not the contracted JSON.
    #[error("Book '{book_id}', chunk {chunk}: response could not be parsed: {source}")]
    Parse {
        book_id: String,
        chunk: usize,
        #[source]
        source: ParseError,
    },

    /// Reading the source or persisting results failed.
    #[error("Book '{book_id}': storage failure: {source}")]
    Store {
        book_id: String,
        #[source]
        source: StoreError,
    },

    /// The job's cancellation token fired.
    #[error("Book '{book_id}': enrichment cancelled{}", during_chunk(.chunk))]
    Cancelled {
        book_id: String,
        chunk: Option<usize>,
    },
}

fn during_chunk(chunk: &Option<usize>) -> String {
    chunk.map(|c| format!(" during chunk {c}")).unwrap_or_default()
}

impl EnrichError {
    /// Zero-based index of the chunk that failed, when the failure belongs to one.
    pub fn chunk(&self) -> Option<usize> {
        match self {
            EnrichError::Extraction { chunk, .. }
            | EnrichError::Api { chunk, .. }
            | EnrichError::Parse { chunk, .. } => Some(*chunk),
            EnrichError::Cancelled { chunk, .. } => *chunk,
            _ => None,
        }
    }

    /// Whether running the job again (resuming) could plausibly succeed.
    ///
    /// Exhausted transient retries, storage hiccups and cancellation are
    /// worth another attempt; bad input, 4xx rejections and malformed model
    /// output for the same chunk are not, short of changing the chunk size.
    pub fn is_retryable_job(&self) -> bool {
        match self {
            EnrichError::Api { source, .. } => matches!(source, ApiError::RetriesExhausted { .. }),
            EnrichError::Store { .. } | EnrichError::Cancelled { .. } => true,
            _ => false,
        }
    }
}

/// Page-range extraction failure.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// `start >= end`.
    #[error("empty page range [{start}, {end})")]
    EmptyRange { start: usize, end: usize },

    /// `end` exceeds the document's page count.
    #[error("page range [{start}, {end}) is out of bounds (document has {total} pages)")]
    OutOfBounds {
        start: usize,
        end: usize,
        total: usize,
    },

    /// lopdf could not parse the source document.
    #[error("source PDF could not be loaded: {0}")]
    Load(String),

    /// lopdf could not serialise the cut-down document.
    #[error("chunk PDF could not be written: {0}")]
    Save(String),
}

/// One failed attempt against the model endpoint.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),

    /// The per-attempt deadline elapsed.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A 2xx answer whose envelope could not be decoded.
    #[error("malformed response envelope: {0}")]
    Malformed(String),
}

impl TransportError {
    /// 5xx, network, timeout and malformed envelopes are transient; 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Network(_)
            | TransportError::Timeout { .. }
            | TransportError::Malformed(_) => true,
        }
    }
}

/// Outcome of a failed [`crate::pipeline::llm::LlmClient::send`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// A client-error status; never retried.
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// Cancellation fired while a request or backoff wait was pending.
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// The model's payload does not match the structured-output contract.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Blank candidate text.
    #[error("model returned an empty response")]
    Empty,

    /// Not JSON, or JSON of the wrong shape.
    #[error("response does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Blob store or (de)serialisation failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or backend I/O failed for `key`.
    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Stored document is not a valid page array.
    #[error("stored document '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Pages could not be serialised.
    #[error("serialisation failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The backend did not answer within `store_timeout_secs`.
    #[error("{operation} '{key}' timed out after {secs}s")]
    Timeout {
        operation: &'static str,
        key: String,
        secs: u64,
    },
}
