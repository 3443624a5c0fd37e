//! Model interaction: send one chunk PDF + prompt + schema, with retry/backoff.
//!
//! The HTTP details live behind [`GenerateTransport`] so that the retry
//! policy can be exercised without a network. [`HttpTransport`] speaks the
//! generateContent protocol: a single user turn with an inline PDF part and
//! a text part, plus a `generationConfig` carrying the sampling parameters
//! and the JSON response schema.
//!
//! ## Retry Strategy
//!
//! Network errors, timeouts, 5xx statuses and undecodable envelopes are
//! transient. The wait after failed attempt `n` is `base * 2^(n-1)`, so with
//! three attempts and a 2 s base the sequence is 2 s → 4 s. Client errors
//! (4xx) mean the request itself is wrong and fail immediately. Every wait,
//! and every in-flight attempt, races the job's cancellation token.

use crate::config::{EnrichConfig, TOP_K, TOP_P};
use crate::error::{ApiError, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Finish reason reported when the output hit `maxOutputTokens`.
pub const FINISH_MAX_TOKENS: &str = "MAX_TOKENS";

/// Sampling and length parameters, fixed for the lifetime of one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

/// Everything one attempt needs.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// PDF bytes of the chunk.
    pub document: Arc<Vec<u8>>,
    pub mime_type: &'static str,
    pub prompt: String,
    pub schema: Value,
    pub params: GenerationParams,
}

/// Token counts as reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Decoded answer of one successful attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    /// Concatenated text parts of the first candidate.
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// One request/response exchange with the model endpoint, no retries.
#[async_trait]
pub trait GenerateTransport: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TransportError>;
}

/// Result of [`LlmClient::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
    /// Attempts used, the successful one included.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl LlmResponse {
    /// The output stopped at the token ceiling and is probably incomplete.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_MAX_TOKENS)
    }
}

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first included. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Deadline for each individual attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EnrichConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            attempt_timeout: config.api_timeout(),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Retrying client over a [`GenerateTransport`].
#[derive(Clone)]
pub struct LlmClient {
    transport: Arc<dyn GenerateTransport>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl LlmClient {
    pub fn new(transport: Arc<dyn GenerateTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Client talking HTTP to the configured endpoint.
    pub fn from_config(config: &EnrichConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), RetryPolicy::from_config(config)))
    }

    /// Abort pending attempts and waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Send the document with the prompt and response schema.
    ///
    /// Returns the first successful answer. A 4xx status fails at once with
    /// [`ApiError::Rejected`]; transient failures are retried until
    /// `max_attempts` is used up, then surface as
    /// [`ApiError::RetriesExhausted`] carrying the last cause.
    pub async fn send(
        &self,
        document: Arc<Vec<u8>>,
        prompt: &str,
        schema: &Value,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<LlmResponse, ApiError> {
        let request = GenerateRequest {
            document,
            mime_type: "application/pdf",
            prompt: prompt.to_string(),
            schema: schema.clone(),
            params: GenerationParams {
                temperature,
                max_output_tokens,
                top_p: TOP_P,
                top_k: TOP_K,
            },
        };
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let timeout_secs = self.policy.attempt_timeout.as_secs();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(
                "LLM attempt {}/{} ({} document bytes)",
                attempt,
                max_attempts,
                request.document.len()
            );

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ApiError::Cancelled { attempts: attempt });
                }
                r = tokio::time::timeout(self.policy.attempt_timeout, self.transport.generate(&request)) => {
                    r.unwrap_or(Err(TransportError::Timeout { secs: timeout_secs }))
                }
            };

            let err = match outcome {
                Ok(response) => {
                    let usage = response.usage.unwrap_or_default();
                    if response.usage.is_some() {
                        info!(
                            "LLM call succeeded on attempt {}: {} prompt / {} output / {} total tokens",
                            attempt, usage.prompt_tokens, usage.output_tokens, usage.total_tokens
                        );
                    } else {
                        info!("LLM call succeeded on attempt {} (no usage reported)", attempt);
                    }
                    return Ok(LlmResponse {
                        text: response.text,
                        finish_reason: response.finish_reason,
                        usage,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!("LLM attempt {} failed permanently: {}", attempt, err);
                return Err(match err {
                    TransportError::Status { status, body } => ApiError::Rejected { status, body },
                    other => ApiError::RetriesExhausted {
                        attempts: attempt,
                        last: other,
                    },
                });
            }

            if attempt >= max_attempts {
                warn!("LLM call gave up after {} attempts: {}", attempt, err);
                return Err(ApiError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let backoff = self.policy.backoff(attempt);
            warn!(
                "LLM attempt {}/{} failed: {}; retrying in {}ms",
                attempt,
                max_attempts,
                err,
                backoff.as_millis()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ApiError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

// ── HTTP transport ───────────────────────────────────────────────────────

/// generateContent over HTTPS with an `x-goog-api-key` header.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &EnrichConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.api_timeout())
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            timeout_secs: config.api_timeout_secs,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: [WireContent<'a>; 1],
    generation_config: WireGenerationConfig<'a>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    #[serde(rename_all = "camelCase")]
    Inline { inline_data: WireBlob<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig<'a> {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireCandidatePart>,
}

#[derive(Deserialize)]
struct WireCandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

fn encode_request(request: &GenerateRequest) -> WireRequest<'_> {
    WireRequest {
        contents: [WireContent {
            role: "user",
            parts: vec![
                WirePart::Inline {
                    inline_data: WireBlob {
                        mime_type: request.mime_type,
                        data: STANDARD.encode(request.document.as_slice()),
                    },
                },
                WirePart::Text {
                    text: &request.prompt,
                },
            ],
        }],
        generation_config: WireGenerationConfig {
            temperature: request.params.temperature,
            max_output_tokens: request.params.max_output_tokens,
            top_p: request.params.top_p,
            top_k: request.params.top_k,
            response_mime_type: "application/json",
            response_schema: &request.schema,
        },
    }
}

fn decode_response(body: &str) -> Result<GenerateResponse, TransportError> {
    let wire: WireResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;

    let usage = wire.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
        total_tokens: if u.total_token_count > 0 {
            u.total_token_count
        } else {
            u.prompt_token_count + u.candidates_token_count
        },
    });

    let Some(candidate) = wire.candidates.into_iter().next() else {
        return Ok(GenerateResponse {
            text: String::new(),
            finish_reason: None,
            usage,
        });
    };

    let text = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default();

    Ok(GenerateResponse {
        text,
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[async_trait]
impl GenerateTransport for HttpTransport {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TransportError> {
        let body = encode_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        decode_response(&text)
    }
}
