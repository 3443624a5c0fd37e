//! Progress-callback trait for chunk-level job events.
//!
//! Pass an [`Arc<dyn EnrichProgressCallback>`] to
//! [`crate::enrich::Enricher::enrich`] to receive events as the job moves
//! through its chunks. Callers can forward them to a progress bar, a job
//! table or a websocket without the library knowing which.
//!
//! # Example
//!
//! ```rust
//! use book_enrich::EnrichProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct LastPage(AtomicUsize);
//!
//! impl EnrichProgressCallback for LastPage {
//!     fn on_chunk_complete(&self, last_page: usize, total_pages: usize) {
//!         self.0.store(last_page, Ordering::SeqCst);
//!         eprintln!("{last_page}/{total_pages} pages enriched");
//!     }
//! }
//! ```

use crate::output::EnrichmentResult;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one job invocation.
///
/// ```text
/// Idle → LoadingSource → ComputingChunks → ProcessingChunk(i) → Persisting(i)
///      → (next i | Done) → Succeeded | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    LoadingSource,
    ComputingChunks,
    ProcessingChunk(usize),
    Persisting(usize),
    Done,
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => f.write_str("idle"),
            JobState::LoadingSource => f.write_str("loading-source"),
            JobState::ComputingChunks => f.write_str("computing-chunks"),
            JobState::ProcessingChunk(i) => write!(f, "processing-chunk({i})"),
            JobState::Persisting(i) => write!(f, "persisting({i})"),
            JobState::Done => f.write_str("done"),
            JobState::Succeeded => f.write_str("succeeded"),
            JobState::Failed => f.write_str("failed"),
        }
    }
}

/// Called by the orchestrator as a job progresses.
///
/// Chunks run strictly in order, so calls for one job never overlap. The
/// trait is still `Send + Sync` because different jobs may share one
/// callback across tasks. All methods default to no-ops.
pub trait EnrichProgressCallback: Send + Sync {
    /// Called once the chunk plan is known.
    ///
    /// # Arguments
    /// * `total_pages` : page count of the source PDF
    /// * `total_chunks`: `ceil(total_pages / chunk_size)`
    /// * `start_chunk` : first chunk this invocation will process (resume)
    fn on_job_start(&self, total_pages: usize, total_chunks: usize, start_chunk: usize) {
        let _ = (total_pages, total_chunks, start_chunk);
    }

    /// Called on every state-machine transition.
    fn on_state_change(&self, state: JobState) {
        let _ = state;
    }

    /// Called just before the chunk PDF is cut and sent.
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// Called after a chunk has been parsed and durably persisted.
    ///
    /// # Arguments
    /// * `last_page`  : 1-based absolute number of the chunk's final page
    /// * `total_pages`: page count of the source PDF
    fn on_chunk_complete(&self, last_page: usize, total_pages: usize) {
        let _ = (last_page, total_pages);
    }

    /// Called when the model hit its output-token ceiling on a chunk.
    fn on_chunk_truncated(&self, chunk: usize) {
        let _ = chunk;
    }

    /// Called once after the final chunk, with the result about to be returned.
    fn on_job_complete(&self, result: &EnrichmentResult) {
        let _ = result;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl EnrichProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type accepted by the orchestrator.
pub type ProgressCallback = Arc<dyn EnrichProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        last_page: AtomicUsize,
        states: Mutex<Vec<JobState>>,
    }

    impl EnrichProgressCallback for Tracking {
        fn on_state_change(&self, state: JobState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_chunk_complete(&self, last_page: usize, _total_pages: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.last_page.store(last_page, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start(30, 3, 0);
        cb.on_state_change(JobState::ProcessingChunk(0));
        cb.on_chunk_start(0, 3);
        cb.on_chunk_complete(10, 30);
        cb.on_chunk_truncated(0);
    }

    #[test]
    fn arc_dyn_callback_receives_events() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();
        cb.on_state_change(JobState::LoadingSource);
        cb.on_chunk_complete(10, 25);
        cb.on_chunk_complete(20, 25);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.last_page.load(Ordering::SeqCst), 20);
        assert_eq!(*tracker.states.lock().unwrap(), vec![JobState::LoadingSource]);
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::ProcessingChunk(4).to_string(), "processing-chunk(4)");
        assert_eq!(JobState::Persisting(0).to_string(), "persisting(0)");
    }
}
