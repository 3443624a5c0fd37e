//! CLI binary for book-enrich.
//!
//! A thin shim over the library crate: maps CLI flags to `EnrichConfig`,
//! runs one job against a local directory store and prints the outcome.

use anyhow::{Context, Result};
use book_enrich::store::{result_key, source_key, BlobMetadata};
use book_enrich::{
    BlobStore, BookContext, EnrichConfig, EnrichProgressCallback, Enricher,
    EnrichmentResult, LlmClient, LocalBlobStore, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Page-based progress bar; one log line per finished chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    chunk_size: usize,
}

impl CliProgressCallback {
    fn new(chunk_size: usize) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading source PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_size,
        })
    }
}

impl EnrichProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize, total_chunks: usize, start_chunk: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar
            .set_position((start_chunk * self.chunk_size).min(total_pages) as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Enriching");
        self.bar.reset_eta();

        let resumed = if start_chunk > 0 {
            format!(" (resuming at chunk {})", start_chunk + 1)
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_pages} pages in {total_chunks} chunks{resumed}"
            ))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        self.bar
            .set_message(format!("chunk {}/{}", chunk + 1, total_chunks));
    }

    fn on_chunk_complete(&self, last_page: usize, total_pages: usize) {
        self.bar.println(format!(
            "  {} pages up to {:>4}/{:<4}",
            green("✓"),
            last_page,
            total_pages
        ));
        self.bar.set_position(last_page as u64);
    }

    fn on_chunk_truncated(&self, chunk: usize) {
        self.bar.println(format!(
            "  {} chunk {} hit the output-token ceiling; its pages may be incomplete",
            yellow("⚠"),
            chunk + 1
        ));
    }

    fn on_job_complete(&self, result: &EnrichmentResult) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages enriched ({} chunks processed, {} resumed)",
            green("✔"),
            bold(&result.pages.len().to_string()),
            result.chunks_processed,
            result.chunks_skipped
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Seed the store with a PDF and enrich it
  book-enrich diwan --store-dir ./data --input diwan.pdf --title "ديوان"

  # Resume after the last page recorded in the stored result
  book-enrich diwan --store-dir ./data --resume auto

  # Resume after a known page index (zero-based)
  book-enrich diwan --store-dir ./data --resume 39

  # Show the chunk plan without calling the model
  book-enrich diwan --store-dir ./data --inspect-only

STORE LAYOUT:
  {store-dir}/books/raw/{id}.pdf                         source PDF
  {store-dir}/batch/structured/{id}-structured.json      enriched pages
  {store-dir}/batch/structured/{id}-structured.json.meta.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          API key for the model endpoint
  BOOK_ENRICH_MODEL       Override model ID
  BOOK_ENRICH_BASE_URL    Override endpoint base URL
  RUST_LOG                Tracing filter (overrides -v / -q)
"#;

/// Enrich Arabic book PDFs into structured, vocalised JSON with an LLM.
#[derive(clap::Parser, Debug)]
#[command(
    name = "book-enrich",
    version,
    about = "Enrich Arabic book PDFs into structured, vocalised JSON with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Book id; selects books/raw/{id}.pdf in the store.
    book_id: String,

    /// Root directory of the blob store.
    #[arg(long, env = "BOOK_ENRICH_STORE_DIR")]
    store_dir: PathBuf,

    /// Copy this PDF into the store as the book's source before running.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Last processed zero-based page index, or `auto` to read it from the store.
    #[arg(long, default_value = "-1", value_parser = parse_resume, allow_hyphen_values = true)]
    resume: Resume,

    /// Book title, for the prompt.
    #[arg(long)]
    title: Option<String>,

    /// Book author, for the prompt.
    #[arg(long)]
    author: Option<String>,

    /// Book genre, for the prompt.
    #[arg(long)]
    genre: Option<String>,

    /// Short book description, for the prompt.
    #[arg(long)]
    description: Option<String>,

    /// API key for the model endpoint.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID.
    #[arg(long, env = "BOOK_ENRICH_MODEL")]
    model: Option<String>,

    /// Endpoint base URL.
    #[arg(long, env = "BOOK_ENRICH_BASE_URL")]
    base_url: Option<String>,

    /// Pages per model call.
    #[arg(long, env = "BOOK_ENRICH_CHUNK_SIZE", default_value_t = 10)]
    chunk_size: usize,

    /// Maximum source PDF size in MB.
    #[arg(long, env = "BOOK_ENRICH_MAX_PDF_SIZE_MB", default_value_t = 50)]
    max_pdf_size_mb: usize,

    /// Maximum source page count.
    #[arg(long, env = "BOOK_ENRICH_MAX_PAGES", default_value_t = 2000)]
    max_pages: usize,

    /// Per-attempt model call timeout in seconds.
    #[arg(long, env = "BOOK_ENRICH_API_TIMEOUT", default_value_t = 600)]
    api_timeout: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "BOOK_ENRICH_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Output-token ceiling per call.
    #[arg(long, env = "BOOK_ENRICH_MAX_OUTPUT_TOKENS", default_value_t = 65_536)]
    max_output_tokens: u32,

    /// Attempts per call, the first included.
    #[arg(long, env = "BOOK_ENRICH_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Base backoff delay in milliseconds.
    #[arg(long, env = "BOOK_ENRICH_RETRY_DELAY_MS", default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Deadline for each store read or write in seconds.
    #[arg(long, env = "BOOK_ENRICH_STORE_TIMEOUT", default_value_t = 60)]
    store_timeout: u64,

    /// Print the EnrichmentResult (or inspect report) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Show the chunk plan and resume cursor, no model calls.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "BOOK_ENRICH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Auto,
    After(i64),
}

fn parse_resume(s: &str) -> std::result::Result<Resume, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(Resume::Auto);
    }
    match s.parse::<i64>() {
        Ok(n) if n >= -1 => Ok(Resume::After(n)),
        Ok(n) => Err(format!("page index must be ≥ -1, got {n}")),
        Err(_) => Err(format!("expected a page index or 'auto', got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = <Cli as clap::Parser>::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let store = Arc::new(LocalBlobStore::new(&cli.store_dir));

    // ── Seed the source PDF ──────────────────────────────────────────────
    if let Some(ref path) = cli.input {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut metadata = BlobMetadata::new();
        metadata.insert("content-type".into(), "application/pdf".into());
        store
            .put(&source_key(&cli.book_id), bytes, metadata)
            .await
            .context("Failed to store source PDF")?;
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        // No API key needed: the client is never called.
        let client = LlmClient::from_config(&config).context("Failed to set up HTTP client")?;
        let enricher = Enricher::with_client(config, store.clone(), store, client)
            .context("Invalid configuration")?;
        let report = enricher
            .inspect(&cli.book_id)
            .await
            .context("Failed to inspect book")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        } else {
            println!("Book:          {}", report.book_id);
            println!("Pages:         {}", report.total_pages);
            println!("Size:          {} bytes", report.byte_len);
            println!(
                "Chunks:        {} × {} pages",
                report.total_chunks, report.chunk_size
            );
            println!("Result stored: {}", report.has_result);
            println!("Resume cursor: {}", report.resume_cursor);
            println!(
                "Next chunk:    {}",
                if report.next_chunk >= report.total_chunks {
                    "none (complete)".to_string()
                } else {
                    (report.next_chunk + 1).to_string()
                }
            );
        }
        return Ok(());
    }

    // ── Run the job ──────────────────────────────────────────────────────
    let chunk_size = config.chunk_size;
    let enricher = Enricher::new(config, store.clone(), store.clone())
        .context("Invalid configuration (is GEMINI_API_KEY set?)")?;

    let cancel = enricher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step");
            cancel.cancel();
        }
    });

    let resume = match cli.resume {
        Resume::After(n) => n,
        Resume::Auto => enricher
            .result_store()
            .resume_cursor(&cli.book_id)
            .await
            .context("Failed to read resume cursor")?,
    };

    let context = BookContext {
        title: cli.title.clone(),
        author: cli.author.clone(),
        genre: cli.genre.clone(),
        description: cli.description.clone(),
    };

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new(chunk_size) as Arc<dyn EnrichProgressCallback>)
    } else {
        None
    };

    let result = enricher
        .enrich(&cli.book_id, resume, &context, progress)
        .await
        .context("Enrichment failed; completed chunks are kept, rerun with --resume auto")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !cli.quiet {
        let output = cli.store_dir.join(result_key(&cli.book_id));
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            if result.was_truncated {
                yellow("⚠")
            } else {
                green("✔")
            },
            result.pages.len(),
            result.duration_ms,
            bold(&output.display().to_string()),
        );
        eprintln!("   {} tokens", dim(&result.total_tokens.to_string()));
        if result.was_truncated {
            eprintln!(
                "   truncated chunks: {:?}; consider a smaller --chunk-size",
                result
                    .truncated_chunks
                    .iter()
                    .map(|c| c + 1)
                    .collect::<Vec<_>>()
            );
        }
    }

    Ok(())
}

/// Map CLI args to `EnrichConfig`.
fn build_config(cli: &Cli) -> Result<EnrichConfig> {
    let mut builder = EnrichConfig::builder()
        .chunk_size(cli.chunk_size)
        .max_pdf_size_mb(cli.max_pdf_size_mb)
        .max_pages(cli.max_pages)
        .api_timeout_secs(cli.api_timeout)
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_output_tokens)
        .max_attempts(cli.max_attempts)
        .retry_base_delay_ms(cli.retry_delay_ms)
        .store_timeout_secs(cli.store_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }

    builder.build().context("Invalid configuration")
}
