//! Configuration for chunked PDF enrichment.
//!
//! All job behaviour is controlled through [`EnrichConfig`], built via its
//! [`EnrichConfigBuilder`]. The struct is `Clone` so one config can drive
//! several concurrent jobs (one per book).

use crate::error::EnrichError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Nucleus-sampling probability sent with every request.
pub const TOP_P: f32 = 0.95;

/// Top-k sampling cutoff sent with every request.
pub const TOP_K: u32 = 40;

/// Default generateContent endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for an enrichment job.
///
/// Built via [`EnrichConfig::builder()`] or using [`EnrichConfig::default()`].
///
/// # Example
/// ```rust
/// use book_enrich::EnrichConfig;
///
/// let config = EnrichConfig::builder()
///     .chunk_size(8)
///     .max_attempts(5)
///     .api_key("secret")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 8);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Model identifier, e.g. "gemini-2.5-flash".
    pub model: String,

    /// Endpoint root; the request goes to `{base_url}/models/{model}:generateContent`.
    pub base_url: String,

    /// API key sent as the `x-goog-api-key` header. Never printed by `Debug`.
    pub api_key: String,

    /// Largest accepted source PDF in megabytes. Default: 50.
    pub max_pdf_size_mb: usize,

    /// Largest accepted page count. Default: 2000.
    pub max_pages: usize,

    /// Deadline for a single request attempt in seconds. Default: 600.
    ///
    /// A ten-page chunk with full diacritics routinely takes several minutes
    /// to generate, so this is generous. A timed-out attempt counts as a
    /// transient failure and is retried.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output-token ceiling per chunk. Default: 65536.
    ///
    /// Hitting it marks the chunk truncated. The job keeps going; lower
    /// `chunk_size` on a later run if that happens.
    pub max_output_tokens: u32,

    /// Total attempts per chunk request, the first one included. Default: 3.
    pub max_attempts: u32,

    /// Backoff seed in milliseconds. Default: 2000.
    ///
    /// The wait after failed attempt `n` is `retry_base_delay_ms * 2^(n-1)`.
    pub retry_base_delay_ms: u64,

    /// Pages per chunk. Default: 10.
    pub chunk_size: usize,

    /// Deadline for a single blob-store read or write in seconds. Default: 60.
    pub store_timeout_secs: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            max_pdf_size_mb: 50,
            max_pages: 2000,
            api_timeout_secs: 600,
            temperature: 0.1,
            max_output_tokens: 65_536,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            chunk_size: 10,
            store_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for EnrichConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("max_pdf_size_mb", &self.max_pdf_size_mb)
            .field("max_pages", &self.max_pages)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("chunk_size", &self.chunk_size)
            .field("store_timeout_secs", &self.store_timeout_secs)
            .finish()
    }
}

impl EnrichConfig {
    /// Create a new builder for `EnrichConfig`.
    pub fn builder() -> EnrichConfigBuilder {
        EnrichConfigBuilder {
            config: Self::default(),
        }
    }

    /// `max_pdf_size_mb` in bytes.
    pub fn max_pdf_size_bytes(&self) -> usize {
        self.max_pdf_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Check the constraints the builder enforces.
    ///
    /// Fields are public and the struct deserialises, so every
    /// [`crate::Enricher`] constructor runs this again.
    pub fn validate(&self) -> Result<(), EnrichError> {
        let positive = [
            ("chunk_size", self.chunk_size as u64),
            ("max_attempts", u64::from(self.max_attempts)),
            ("max_pdf_size_mb", self.max_pdf_size_mb as u64),
            ("max_pages", self.max_pages as u64),
            ("max_output_tokens", u64::from(self.max_output_tokens)),
            ("api_timeout_secs", self.api_timeout_secs),
            ("store_timeout_secs", self.store_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(EnrichError::InvalidConfig(format!("{name} must be ≥ 1")));
        }
        if self.model.trim().is_empty() {
            return Err(EnrichError::InvalidConfig("model must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(EnrichError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Full generateContent URL for the configured model.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Builder for [`EnrichConfig`].
#[derive(Debug)]
pub struct EnrichConfigBuilder {
    config: EnrichConfig,
}

impl EnrichConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn max_pdf_size_mb(mut self, mb: usize) -> Self {
        self.config.max_pdf_size_mb = mb;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages;
        self
    }

    pub fn store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.store_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EnrichConfig, EnrichError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
