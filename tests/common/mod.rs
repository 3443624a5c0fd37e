//! Shared fixtures: generated PDFs and an in-process stand-in for the model.

#![allow(dead_code)]

use async_trait::async_trait;
use book_enrich::{
    BlobMetadata, BlobStore, EnrichConfig, EnrichProgressCallback, EnrichmentResult,
    GenerateRequest, GenerateResponse, GenerateTransport, JobState, MemoryBlobStore, StoreError,
    TokenUsage, TransportError,
};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// An `n`-page PDF whose page `i` (1-based) draws the text `Page i`.
pub fn make_test_pdf(n: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids: Vec<Object> = Vec::with_capacity(n);
    for i in 1..=n {
        let content = format!("BT /F1 24 Tf 100 700 Td (Page {i}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => n as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// Absolute page numbers drawn on the pages of `pdf`, in page order.
pub fn source_pages_of(pdf: &[u8]) -> Vec<usize> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let content = String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).into_owned();
            let start = content.find("(Page ").unwrap() + "(Page ".len();
            let end = start + content[start..].find(')').unwrap();
            content[start..end].parse().unwrap()
        })
        .collect()
}

/// Test config: chunks of `chunk_size` pages, near-instant backoff.
pub fn config(chunk_size: usize) -> EnrichConfig {
    EnrichConfig::builder()
        .chunk_size(chunk_size)
        .retry_base_delay_ms(1)
        .api_timeout_secs(30)
        .build()
        .unwrap()
}

/// Text the stand-in model writes for absolute page `n`.
pub fn page_text(n: usize) -> String {
    format!("صفحة رقم {n}")
}

/// What the stand-in model does on one call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Describe every page of the chunk.
    Normal,
    /// Like `Normal`, but flagged as cut off at the token ceiling.
    Truncated,
    /// Fail the attempt with this HTTP status.
    Status(u16),
    /// Describe every page, but stop at the token ceiling partway through
    /// the last page's paragraph.
    CutOff,
    /// Answer with text that is not JSON.
    Garbage,
}

/// Reads the chunk PDF it is given and answers like a well-behaved model:
/// one page per PDF page, numbered locally from 1, each with a paragraph
/// naming the absolute page and one verse line.
pub struct BookModel {
    script: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<usize>>>,
    non_content: HashSet<usize>,
    extra_page: bool,
}

impl BookModel {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            non_content: HashSet::new(),
            extra_page: false,
        }
    }

    /// Replies for the first calls, in order; `Normal` afterwards.
    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        let model = Self::new();
        model.script.lock().unwrap().extend(replies);
        model
    }

    /// Mark these absolute pages `keepPage: false`.
    pub fn with_non_content(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.non_content.extend(pages);
        self
    }

    /// Also report a page numbered one past the end of each chunk.
    pub fn with_extra_page(mut self) -> Self {
        self.extra_page = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Absolute source pages contained in each chunk PDF received so far.
    pub fn seen(&self) -> Vec<Vec<usize>> {
        self.seen.lock().unwrap().clone()
    }

    fn describe(&self, absolute_pages: &[usize]) -> String {
        let mut pages: Vec<_> = absolute_pages
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                json!({
                    "pageNumber": i + 1,
                    "keepPage": !self.non_content.contains(&n),
                    "blocks": [
                        { "blockType": "paragraph", "blockText": page_text(n) },
                        { "blockType": "verse_primary", "blockText": "قِفا نَبْكِ ||| مِن ذِكرى" }
                    ]
                })
            })
            .collect();
        if self.extra_page {
            pages.push(json!({
                "pageNumber": absolute_pages.len() + 1,
                "keepPage": true,
                "blocks": [{ "blockType": "paragraph", "blockText": "خارج النطاق" }]
            }));
        }
        json!({ "pages": pages }).to_string()
    }
}

#[async_trait]
impl GenerateTransport for BookModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(request.mime_type, "application/pdf");
        assert!(request.prompt.contains("|||"));

        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Normal);
        let usage = Some(TokenUsage {
            prompt_tokens: 100,
            output_tokens: 50,
            total_tokens: 150,
        });

        match reply {
            Reply::Status(status) => Err(TransportError::Status {
                status,
                body: format!("scripted {status}"),
            }),
            Reply::Garbage => Ok(GenerateResponse {
                text: "I could not read this document.".into(),
                finish_reason: Some("STOP".into()),
                usage,
            }),
            Reply::Normal | Reply::Truncated => {
                let pages = source_pages_of(&request.document);
                self.seen.lock().unwrap().push(pages.clone());
                let finish = if matches!(reply, Reply::Truncated) {
                    "MAX_TOKENS"
                } else {
                    "STOP"
                };
                Ok(GenerateResponse {
                    text: self.describe(&pages),
                    finish_reason: Some(finish.into()),
                    usage,
                })
            }
            Reply::CutOff => {
                let pages = source_pages_of(&request.document);
                self.seen.lock().unwrap().push(pages.clone());
                let mut text = self.describe(&pages);
                let last = page_text(*pages.last().unwrap());
                let cut = text.rfind(&last).unwrap() + "صفحة".len();
                text.truncate(cut);
                Ok(GenerateResponse {
                    text,
                    finish_reason: Some("MAX_TOKENS".into()),
                    usage,
                })
            }
        }
    }
}

/// One recorded progress event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    JobStart(usize, usize, usize),
    State(JobState),
    ChunkStart(usize, usize),
    ChunkComplete(usize, usize),
    Truncated(usize),
    JobComplete(usize),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl EnrichProgressCallback for Recorder {
    fn on_job_start(&self, total_pages: usize, total_chunks: usize, start_chunk: usize) {
        self.push(Event::JobStart(total_pages, total_chunks, start_chunk));
    }

    fn on_state_change(&self, state: JobState) {
        self.push(Event::State(state));
    }

    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        self.push(Event::ChunkStart(chunk, total_chunks));
    }

    fn on_chunk_complete(&self, last_page: usize, total_pages: usize) {
        self.push(Event::ChunkComplete(last_page, total_pages));
    }

    fn on_chunk_truncated(&self, chunk: usize) {
        self.push(Event::Truncated(chunk));
    }

    fn on_job_complete(&self, result: &EnrichmentResult) {
        self.push(Event::JobComplete(result.pages.len()));
    }
}

/// A blob store over memory whose reads and/or writes never complete.
pub struct HangingStore {
    inner: MemoryBlobStore,
    hang_reads: bool,
    hang_writes: bool,
}

impl HangingStore {
    /// Every call hangs.
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            hang_reads: true,
            hang_writes: true,
        }
    }

    /// Reads answer from memory; `put` hangs.
    pub fn writes_only() -> Self {
        Self {
            hang_reads: false,
            ..Self::new()
        }
    }

    async fn stall(&self, hang: bool) {
        if hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl BlobStore for HangingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.stall(self.hang_reads).await;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<(), StoreError> {
        self.stall(self.hang_writes).await;
        self.inner.put(key, bytes, metadata).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.stall(self.hang_reads).await;
        self.inner.exists(key).await
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<BlobMetadata>, StoreError> {
        self.stall(self.hang_reads).await;
        self.inner.get_metadata(key).await
    }
}
