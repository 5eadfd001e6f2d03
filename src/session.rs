//! Review sessions: one document, one run, one result.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──▶ Extracting ──▶ Chunking ──▶ Reviewing ──▶ Reconciling ──▶ Done
//!   │          │             │            │               │
//!   └──────────┴─────────────┴────────────┴───────────────┴──▶ Cancelled | Failed
//! ```
//!
//! A session owns its document, extracted units and chunks, and may run
//! once. Chunks are reviewed concurrently, at most `parallelism` at a time,
//! and complete in any order; reconciliation restores a stable order.
//!
//! ## Cancellation
//!
//! [`CancelHandle::cancel`] is cooperative: it stops new chunks from being
//! dispatched. Requests already in flight finish; their successes are kept
//! and their failures are recorded as cancelled. The run then returns a
//! `partial` result holding only the findings gathered so far.

use crate::config::ReviewConfig;
use crate::document::{Document, DocumentId};
use crate::error::SeleneError;
use crate::output::{ChunkOutcome, ChunkStatus, CompletionStatus, ReviewResult, ReviewStats};
use crate::pipeline::chunk::{chunk_units, Chunk};
use crate::pipeline::datasheet::Datasheet;
use crate::pipeline::extract::{ContentExtractor, ContentUnit};
use crate::pipeline::reconcile::{reconcile, ReconcileOptions};
use crate::pipeline::review::{cancelled_outcome, EndpointStatus, ReviewClient};
use crate::progress::{ProgressSnapshot, ProgressTracker, SessionPhase};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

/// Requests cancellation of a running session. Cheap to clone and safe to
/// use from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reviews one document.
pub struct ReviewSession {
    config: Arc<ReviewConfig>,
    source: PathBuf,
    mime: String,
    document_id: DocumentId,
    client: ReviewClient,
    extractor: ContentExtractor,
    tracker: ProgressTracker,
    cancel: CancelHandle,
    document: Option<Document>,
    datasheet: Option<Datasheet>,
    units: Vec<ContentUnit>,
    chunks: Vec<Chunk>,
}

impl ReviewSession {
    /// Create an idle session for the file at `path` with the given MIME
    /// type. Nothing is read until [`Self::run`].
    pub fn new(
        config: ReviewConfig,
        path: impl AsRef<Path>,
        mime: impl Into<String>,
    ) -> Result<Self, SeleneError> {
        config.validate()?;
        let config = Arc::new(config);
        let client = ReviewClient::new(config.clone())?;
        Ok(Self::assemble(config, client, path.as_ref(), mime.into()))
    }

    /// Like [`Self::new`] but with a caller-supplied HTTP client, e.g. one
    /// shared across sessions or configured with a proxy.
    pub fn with_http_client(
        config: ReviewConfig,
        http: reqwest::Client,
        path: impl AsRef<Path>,
        mime: impl Into<String>,
    ) -> Result<Self, SeleneError> {
        config.validate()?;
        let config = Arc::new(config);
        let client = ReviewClient::with_http_client(http, config.clone());
        Ok(Self::assemble(config, client, path.as_ref(), mime.into()))
    }

    fn assemble(config: Arc<ReviewConfig>, client: ReviewClient, path: &Path, mime: String) -> Self {
        Self {
            extractor: ContentExtractor::new(&config),
            tracker: ProgressTracker::new(config.progress_callback.clone()),
            config,
            source: path.to_path_buf(),
            mime,
            document_id: DocumentId::new(),
            client,
            cancel: CancelHandle::new(),
            document: None,
            datasheet: None,
            units: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Replace the extraction backends.
    pub fn with_extractor(mut self, extractor: ContentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Share an existing cancel handle with this session.
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// The opened document, once extraction has started.
    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// The reference datasheet, once loaded.
    pub fn datasheet(&self) -> Option<&Datasheet> {
        self.datasheet.as_ref()
    }

    /// Extracted pages, in order. Empty before extraction.
    pub fn units(&self) -> &[ContentUnit] {
        &self.units
    }

    /// Chunks, in order. Empty before chunking.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn phase(&self) -> SessionPhase {
        self.tracker.snapshot().phase
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    /// Snapshots as a stream, starting with the current one.
    pub fn progress_stream(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::new(self.tracker.subscribe())
    }

    /// Check the endpoint without touching the document.
    pub async fn check_connection(&self) -> EndpointStatus {
        self.client.check_connection().await
    }

    fn fail(&self, err: SeleneError) -> SeleneError {
        warn!("Review of {} failed: {}", self.source.display(), err);
        self.tracker.set_phase(SessionPhase::Failed);
        err
    }

    /// Result for a session cancelled before any chunk was reviewed.
    fn cancelled_early(&self) -> ReviewResult {
        info!("Review of {} cancelled before review", self.source.display());
        let outcomes: Vec<ChunkOutcome> = self.chunks.iter().map(|c| cancelled_outcome(c, 0)).collect();
        let mut result = reconcile(
            self.document_id,
            &outcomes,
            &ReconcileOptions {
                similarity_threshold: self.config.similarity_threshold,
                cancelled: true,
            },
        );
        result.status = CompletionStatus::Partial;
        result.stats = self.base_stats();
        self.tracker.set_phase(SessionPhase::Cancelled);
        result
    }

    fn base_stats(&self) -> ReviewStats {
        ReviewStats {
            page_count: self.units.len(),
            chunk_count: self.chunks.len(),
            scanned_pages: self.units.iter().filter(|u| u.scanned).count(),
            truncated_chunks: self.chunks.iter().filter(|c| c.truncated()).count(),
            ..ReviewStats::default()
        }
    }

    /// Extract, chunk, review and reconcile.
    ///
    /// # Returns
    /// `Ok(ReviewResult)` when at least one chunk succeeded, or when the
    /// session was cancelled (status `partial`).
    ///
    /// # Errors
    /// - the session already ran
    /// - the file is unsupported, missing, or unreadable by both backends
    /// - a configured datasheet cannot be read ([`SeleneError::Datasheet`])
    /// - every chunk failed ([`SeleneError::AllChunksFailed`])
    pub async fn run(&mut self) -> Result<ReviewResult, SeleneError> {
        if self.phase() != SessionPhase::Idle {
            return Err(SeleneError::Internal(format!(
                "session already ran (phase {:?})",
                self.phase()
            )));
        }
        let total_start = Instant::now();
        info!("Starting review: {}", self.source.display());

        // ── Step 1: Extract ──────────────────────────────────────────────
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled_early());
        }
        self.tracker.set_phase(SessionPhase::Extracting);
        let extract_start = Instant::now();
        let document = match self
            .extractor
            .open_document(
                self.document_id,
                &self.source,
                &self.mime,
                self.config.password.as_deref(),
            )
            .await
        {
            Ok(d) => d,
            Err(e) => return Err(self.fail(e)),
        };
        let units = match self.extractor.extract(&document).await {
            Ok(u) => u,
            Err(e) => return Err(self.fail(e)),
        };
        self.document = Some(document);
        self.units = units;
        if let Some(path) = self.config.datasheet.clone() {
            match Datasheet::load(&self.extractor, &path, self.config.datasheet_budget).await {
                Ok(sheet) => self.datasheet = Some(sheet),
                Err(e) => return Err(self.fail(e)),
            }
        }
        let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

        // ── Step 2: Chunk ────────────────────────────────────────────────
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled_early());
        }
        self.tracker.set_phase(SessionPhase::Chunking);
        self.chunks = chunk_units(&self.units, self.config.budget);
        info!(
            "{} page(s) in {} chunk(s)",
            self.units.len(),
            self.chunks.len()
        );

        // ── Step 3: Review ───────────────────────────────────────────────
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled_early());
        }
        self.tracker.set_phase(SessionPhase::Reviewing);
        let review_start = Instant::now();
        let outcomes = self.review_chunks().await;
        let review_duration_ms = review_start.elapsed().as_millis() as u64;

        // ── Step 4: Reconcile ────────────────────────────────────────────
        let cancelled = self.cancel.is_cancelled();
        self.tracker.set_phase(SessionPhase::Reconciling);
        let mut result = reconcile(
            self.document_id,
            &outcomes,
            &ReconcileOptions {
                similarity_threshold: self.config.similarity_threshold,
                cancelled,
            },
        );
        result.stats = ReviewStats {
            extract_duration_ms,
            review_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            ..self.base_stats()
        };

        if result.status == CompletionStatus::Failed {
            let first_error = outcomes
                .iter()
                .filter_map(|o| o.error.as_ref())
                .min_by_key(|e| e.chunk())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(self.fail(SeleneError::AllChunksFailed {
                total: outcomes.len(),
                first_error,
            }));
        }

        info!(
            "Review complete: {} finding(s) ({} error, {} warning, {} info), {:?}, {}ms",
            result.findings.len(),
            result.summary.error,
            result.summary.warning,
            result.summary.info,
            result.status,
            result.stats.total_duration_ms
        );
        self.tracker.set_phase(if cancelled {
            SessionPhase::Cancelled
        } else {
            SessionPhase::Done
        });
        Ok(result)
    }

    async fn review_chunks(&self) -> Vec<ChunkOutcome> {
        let total = self.chunks.len();
        let template = self.config.instruction_template();
        let client = &self.client;
        let tracker = &self.tracker;
        let cancel = &self.cancel;
        let datasheet = self.datasheet.as_ref();

        tracker.review_started(total);
        let outcomes: Vec<ChunkOutcome> = stream::iter(self.chunks.iter().map(|chunk| async move {
            if cancel.is_cancelled() {
                return cancelled_outcome(chunk, 0);
            }
            tracker.chunk_started(chunk.index, total);
            let outcome = client.review(chunk, template, datasheet).await;

            if outcome.status == ChunkStatus::Failed && cancel.is_cancelled() {
                return cancelled_outcome(chunk, outcome.attempts);
            }
            match &outcome.error {
                None => tracker.chunk_succeeded(chunk.index, total, outcome.findings.len()),
                Some(e) => tracker.chunk_failed(chunk.index, total, &e.to_string()),
            }
            outcome
        }))
        .buffer_unordered(self.config.parallelism)
        .collect()
        .await;

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        tracker.review_finished(total, succeeded);
        outcomes
    }
}
