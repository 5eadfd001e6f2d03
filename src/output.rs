//! Review output types: findings, per-chunk outcomes and the final result.
//!
//! Everything here is `Serialize` so the GUI collaborator can export a
//! [`ReviewResult`] as JSON without touching the pipeline.

use crate::document::{BoundingBox, DocumentId};
use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a finding is. Ordered `Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Parse a severity label as emitted by the model.
    ///
    /// Besides the three canonical names this accepts the five-level
    /// vocabulary reviewers tend to use: `critical`/`high` map to `Error`,
    /// `medium`/`low` to `Warning`, `note` to `Info`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "info" | "note" | "information" => Some(Severity::Info),
            "warning" | "warn" | "medium" | "low" => Some(Severity::Warning),
            "error" | "critical" | "high" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Stable identifier assigned to a finding during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FindingId(pub u32);

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{:04}", self.0)
    }
}

/// Where in the raw model output a finding came from: the chunk and the
/// position of the item in that chunk's parsed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId {
    pub chunk: usize,
    pub ordinal: usize,
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}#{}", self.chunk, self.ordinal)
    }
}

/// One reviewer-identified issue tied to a page and optionally a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Assigned by [`crate::pipeline::reconcile::reconcile`]; `None` before.
    pub id: Option<FindingId>,
    pub chunk_index: usize,
    /// 0-based page index.
    pub page_index: usize,
    pub region: Option<BoundingBox>,
    pub severity: Severity,
    pub message: String,
    pub span: SpanId,
}

/// Final state of one chunk's review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Everything one review call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    /// 0-based, inclusive.
    pub first_page: usize,
    /// 0-based, inclusive.
    pub last_page: usize,
    pub status: ChunkStatus,
    pub findings: Vec<Finding>,
    pub error: Option<ChunkError>,
    /// HTTP attempts made (0 when never dispatched).
    pub attempts: u32,
    pub duration_ms: u64,
    pub truncated: bool,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ChunkStatus::Succeeded
    }

    /// Summary of this outcome without its findings.
    pub fn report(&self) -> ChunkReport {
        ChunkReport {
            chunk_index: self.chunk_index,
            first_page: self.first_page,
            last_page: self.last_page,
            status: self.status,
            finding_count: self.findings.len(),
            error: self.error.as_ref().map(|e| e.to_string()),
            attempts: self.attempts,
            duration_ms: self.duration_ms,
            truncated: self.truncated,
        }
    }
}

/// Per-chunk line of a [`ReviewResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub first_page: usize,
    pub last_page: usize,
    pub status: ChunkStatus,
    /// Findings the chunk produced before deduplication.
    pub finding_count: usize,
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub truncated: bool,
}

/// Overall outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    /// Every chunk succeeded.
    Complete,
    /// Some chunks succeeded, or the session was cancelled.
    Partial,
    /// No chunk succeeded.
    Failed,
}

/// Counts by severity after deduplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub duplicates_discarded: usize,
}

impl ReviewSummary {
    pub fn total(&self) -> usize {
        self.info + self.warning + self.error
    }
}

/// Timing and size figures filled in by the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub page_count: usize,
    pub chunk_count: usize,
    pub scanned_pages: usize,
    pub truncated_chunks: usize,
    pub extract_duration_ms: u64,
    pub review_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The reconciled review of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub document_id: DocumentId,
    /// Deduplicated, sorted by page, position and severity; ids ascend.
    pub findings: Vec<Finding>,
    pub summary: ReviewSummary,
    pub status: CompletionStatus,
    /// One entry per chunk, in chunk order.
    pub chunks: Vec<ChunkReport>,
    pub stats: ReviewStats,
}

impl ReviewResult {
    /// Findings on one page (0-based), in result order.
    pub fn findings_on_page(&self, page_index: usize) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |f| f.page_index == page_index)
    }

    pub fn finding(&self, id: FindingId) -> Option<&Finding> {
        self.findings.iter().find(|f| f.id == Some(id))
    }
}
