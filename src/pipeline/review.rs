//! Model interaction: send one chunk to the endpoint and parse its findings.
//!
//! This module is intentionally thin: prompt wording lives in
//! [`crate::prompts`] and the findings grammar in
//! [`crate::pipeline::findings`], so neither can be changed by accident
//! while touching retry logic here.
//!
//! ## Endpoint protocol
//!
//! Requests go to `POST {endpoint}/api/generate` (the Ollama generate API):
//!
//! ```json
//! {"model": "llava", "prompt": "...", "stream": false,
//!  "images": ["<base64 png>", ...],
//!  "options": {"temperature": 0.1, "top_p": 0.9, "top_k": 40, "num_predict": 2048}}
//! ```
//!
//! The reply is either one JSON object or, when streaming, newline-delimited
//! objects whose `response` fields concatenate into the model output. An
//! `error` field anywhere means the model itself failed.
//!
//! ## Retry Strategy
//!
//! Transport failures and 5xx responses are transient: a local model server
//! that is still loading weights answers 503 for a while. They are retried
//! with exponential backoff (`retry_backoff_ms * 2^(n-1)` before the n-th retry). A 4xx means the
//! request itself is wrong (unknown model, oversized payload) and repeating
//! it cannot help, so it fails the chunk at once. Unparseable model output
//! is not retried either; it is reported as a finding so the user sees it.

use crate::config::ReviewConfig;
use crate::error::{ChunkError, SeleneError};
use crate::output::{ChunkOutcome, ChunkStatus, Finding, Severity, SpanId};
use crate::pipeline::chunk::Chunk;
use crate::pipeline::datasheet::Datasheet;
use crate::pipeline::encode::encode_page;
use crate::pipeline::findings::parse_findings;
use crate::pipeline::raster::PageRaster;
use crate::prompts::build_review_prompt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

pub const GENERATE_PATH: &str = "/api/generate";
pub const TAGS_PATH: &str = "/api/tags";

/// Timeout for the connection check, independent of the review timeout.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest slice of an error body kept in a [`ChunkError`].
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GeneratePiece {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Result of [`ReviewClient::check_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub reachable: bool,
    pub model_available: bool,
    pub available_models: Vec<String>,
    /// Why the endpoint is unreachable, when it is.
    pub detail: Option<String>,
}

/// Why a generate body could not be turned into model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    /// The endpoint reported a model error.
    Model(String),
    /// The body is not a generate response.
    Malformed(String),
}

/// Collapse a generate response body into the model's output text.
///
/// Accepts a single JSON object or newline-delimited objects; the `response`
/// fields are concatenated in order. Lines after a `done: true` piece are
/// ignored.
pub fn collapse_generate_body(body: &str) -> Result<String, BodyError> {
    let mut output = String::new();
    let mut pieces = 0usize;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let piece: GeneratePiece = serde_json::from_str(line).map_err(|e| {
            BodyError::Malformed(format!("line {}: {}", pieces + 1, e))
        })?;
        if let Some(err) = piece.error {
            return Err(BodyError::Model(err));
        }
        output.push_str(&piece.response);
        pieces += 1;
        if piece.done {
            break;
        }
    }

    if pieces == 0 {
        return Err(BodyError::Malformed("empty response body".to_string()));
    }
    Ok(output)
}

/// True if an installed model `name` satisfies the configured `model`.
///
/// `llava` matches `llava:latest` and `llava:13b`; `llava:13b` matches only
/// itself.
pub fn model_matches(model: &str, name: &str) -> bool {
    if name == model {
        return true;
    }
    match (model.split_once(':'), name.split_once(':')) {
        (None, Some((family, _))) => family == model,
        _ => false,
    }
}

/// One failed attempt.
enum AttemptError {
    /// Worth retrying.
    Transient(String),
    /// Final for this chunk.
    Fatal(ChunkError),
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_LIMIT {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{}…", cut)
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// HTTP client for the review endpoint.
#[derive(Clone)]
pub struct ReviewClient {
    http: reqwest::Client,
    config: Arc<ReviewConfig>,
}

impl ReviewClient {
    /// Build a client with the configured request timeout.
    pub fn new(config: Arc<ReviewConfig>) -> Result<Self, SeleneError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| SeleneError::HttpClient {
                endpoint: config.endpoint.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self::with_http_client(http, config))
    }

    /// Use a caller-provided `reqwest::Client`.
    pub fn with_http_client(http: reqwest::Client, config: Arc<ReviewConfig>) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    /// Ask the endpoint which models it has.
    ///
    /// Never fails: an unreachable endpoint is reported in the status.
    pub async fn check_connection(&self) -> EndpointStatus {
        let unreachable = |detail: String| EndpointStatus {
            reachable: false,
            model_available: false,
            available_models: Vec::new(),
            detail: Some(detail),
        };

        let resp = match self
            .http
            .get(self.url(TAGS_PATH))
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return unreachable(describe(&e)),
        };
        if !resp.status().is_success() {
            return unreachable(format!("HTTP {}", resp.status()));
        }
        let tags: TagsResponse = match resp.json().await {
            Ok(t) => t,
            Err(e) => return unreachable(format!("unexpected /api/tags reply: {}", e)),
        };

        let available_models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        let model_available = available_models
            .iter()
            .any(|name| model_matches(&self.config.model, name));
        info!(
            "Endpoint {} reachable, {} model(s), '{}' {}",
            self.config.endpoint,
            available_models.len(),
            self.config.model,
            if model_available { "available" } else { "missing" }
        );

        EndpointStatus {
            reachable: true,
            model_available,
            available_models,
            detail: None,
        }
    }

    /// Review one chunk with the given instruction template and optional
    /// reference datasheet.
    ///
    /// Always returns an outcome: failures are recorded in it, never
    /// propagated, so one bad chunk cannot abort the document.
    pub async fn review(
        &self,
        chunk: &Chunk,
        template: &str,
        datasheet: Option<&Datasheet>,
    ) -> ChunkOutcome {
        let start = Instant::now();
        let prompt = build_review_prompt(template, chunk, datasheet);
        let images = if self.config.embed_images {
            encode_rasters(chunk).await
        } else {
            Vec::new()
        };
        debug!(
            "Chunk {} (pages {}): {} chars prompt, {} image(s)",
            chunk.index,
            chunk.page_label(),
            prompt.len(),
            images.len()
        );

        let request = GenerateRequest {
            model: &self.config.model,
            prompt: &prompt,
            stream: self.config.stream,
            images,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                num_predict: self.config.num_predict,
            },
        };

        let mut last_err: Option<String> = None;
        let mut attempts = 0u32;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self
                    .config
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                warn!(
                    "Chunk {}: retry {}/{} after {}ms",
                    chunk.index, attempt, self.config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            attempts = attempt + 1;

            match self.send(&request, chunk.index).await {
                Ok(output) => {
                    return match parse_findings(&output, chunk) {
                        Ok(findings) => {
                            debug!("Chunk {}: {} finding(s)", chunk.index, findings.len());
                            outcome(chunk, ChunkStatus::Succeeded, findings, None, attempts, start)
                        }
                        Err(detail) => {
                            warn!("Chunk {}: unparseable output: {}", chunk.index, detail);
                            failed(
                                chunk,
                                ChunkError::Parse {
                                    chunk: chunk.index,
                                    detail,
                                },
                                attempts,
                                start,
                            )
                        }
                    };
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!("{}", err);
                    return failed(chunk, err, attempts, start);
                }
                Err(AttemptError::Transient(detail)) => {
                    warn!(
                        "Chunk {}: attempt {} failed: {}",
                        chunk.index, attempts, detail
                    );
                    last_err = Some(detail);
                }
            }
        }

        let err = ChunkError::Network {
            chunk: chunk.index,
            attempts,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        };
        failed(chunk, err, attempts, start)
    }

    async fn send(&self, request: &GenerateRequest<'_>, chunk: usize) -> Result<String, AttemptError> {
        let resp = self
            .http
            .post(self.url(GENERATE_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(describe(&e)))?;

        let status = resp.status();
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError::Transient(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet(&body)
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(ChunkError::Rejected {
                chunk,
                status: status.as_u16(),
                detail: snippet(&body),
            }));
        }

        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(piece) = stream.next().await {
            let bytes = piece.map_err(|e| AttemptError::Transient(describe(&e)))?;
            body.extend_from_slice(&bytes);
        }

        collapse_generate_body(&String::from_utf8_lossy(&body)).map_err(|e| match e {
            BodyError::Model(detail) => AttemptError::Fatal(ChunkError::Model { chunk, detail }),
            BodyError::Malformed(detail) => AttemptError::Fatal(ChunkError::Parse { chunk, detail }),
        })
    }
}

/// Render and encode every raster in the chunk. Pages that fail to render
/// are skipped; the chunk is still reviewed from its text.
async fn encode_rasters(chunk: &Chunk) -> Vec<String> {
    let rasters: Vec<Arc<PageRaster>> = chunk.units.iter().filter_map(|u| u.raster.clone()).collect();
    if rasters.is_empty() {
        return Vec::new();
    }
    let chunk_index = chunk.index;
    let result = tokio::task::spawn_blocking(move || {
        rasters
            .iter()
            .filter_map(|raster| {
                let encoded = raster
                    .materialize()
                    .and_then(|img| encode_page(&img).map_err(|e| e.to_string()));
                match encoded {
                    Ok(b64) => Some(b64),
                    Err(e) => {
                        warn!(
                            "Chunk {}: page {} image unavailable, reviewing text only: {}",
                            chunk_index,
                            raster.page_index() + 1,
                            e
                        );
                        None
                    }
                }
            })
            .collect()
    })
    .await;

    result.unwrap_or_else(|e| {
        warn!("Chunk {}: image task panicked: {}", chunk_index, e);
        Vec::new()
    })
}

fn outcome(
    chunk: &Chunk,
    status: ChunkStatus,
    findings: Vec<Finding>,
    error: Option<ChunkError>,
    attempts: u32,
    start: Instant,
) -> ChunkOutcome {
    ChunkOutcome {
        chunk_index: chunk.index,
        first_page: chunk.first_page(),
        last_page: chunk.last_page(),
        status,
        findings,
        error,
        attempts,
        duration_ms: start.elapsed().as_millis() as u64,
        truncated: chunk.truncated(),
    }
}

/// A failed outcome. Parse failures also carry one error finding so the
/// problem shows up next to the pages it concerns.
fn failed(chunk: &Chunk, err: ChunkError, attempts: u32, start: Instant) -> ChunkOutcome {
    let findings = match &err {
        ChunkError::Parse { detail, .. } => vec![Finding {
            id: None,
            chunk_index: chunk.index,
            page_index: chunk.first_page(),
            region: None,
            severity: Severity::Error,
            message: format!(
                "Review output for pages {} could not be parsed: {}",
                chunk.page_label(),
                detail
            ),
            span: SpanId {
                chunk: chunk.index,
                ordinal: 0,
            },
        }],
        _ => Vec::new(),
    };
    outcome(chunk, ChunkStatus::Failed, findings, Some(err), attempts, start)
}

/// Outcome for a chunk that was never dispatched, or whose failure arrived
/// after cancellation.
pub fn cancelled_outcome(chunk: &Chunk, attempts: u32) -> ChunkOutcome {
    ChunkOutcome {
        chunk_index: chunk.index,
        first_page: chunk.first_page(),
        last_page: chunk.last_page(),
        status: ChunkStatus::Cancelled,
        findings: Vec::new(),
        error: Some(ChunkError::Cancelled { chunk: chunk.index }),
        attempts,
        duration_ms: 0,
        truncated: chunk.truncated(),
    }
}
