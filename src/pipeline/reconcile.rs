//! Reconciliation: merge per-chunk findings into one ordered, deduplicated
//! result.
//!
//! Chunks complete in any order, and neighbouring chunks often describe the
//! same problem twice (a net label that continues across sheets, a rail
//! reviewed from both ends). Reconciliation is a pure function of the
//! outcomes, so running it twice on the same input gives the same result.
//!
//! ## Duplicate rule
//!
//! Two findings are duplicates when they are on the same page, their regions
//! overlap (or neither has one), and their messages match: equal after
//! normalisation, or with token-set Jaccard similarity at or above the
//! threshold. The finding that comes first in chunk/ordinal order is kept.

use crate::document::DocumentId;
use crate::output::{
    ChunkOutcome, ChunkStatus, CompletionStatus, Finding, FindingId, ReviewResult, ReviewStats,
    ReviewSummary, Severity,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Inputs to [`reconcile`] besides the outcomes.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Jaccard similarity at or above which two messages match.
    pub similarity_threshold: f32,
    /// Whether the session was cancelled before every chunk ran.
    pub cancelled: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            cancelled: false,
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_message(message: &str) -> String {
    message
        .split(|c: char| !c.is_alphanumeric() && c != '.' && c != '%')
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the normalised token sets, in `[0, 1]`.
pub fn message_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_message(a);
    let b = normalize_message(b);
    let ta: HashSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let tb: HashSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    inter / union
}

/// Whether `b` duplicates `a` under the duplicate rule.
pub fn is_duplicate(a: &Finding, b: &Finding, threshold: f32) -> bool {
    if a.page_index != b.page_index {
        return false;
    }
    let regions_match = match (&a.region, &b.region) {
        (Some(ra), Some(rb)) => ra.overlaps(rb),
        (None, None) => true,
        _ => false,
    };
    if !regions_match {
        return false;
    }
    normalize_message(&a.message) == normalize_message(&b.message)
        || message_similarity(&a.message, &b.message) >= threshold
}

/// Drop duplicates, keeping first occurrences. Returns the kept findings in
/// input order and the number dropped.
pub fn deduplicate(findings: Vec<Finding>, threshold: f32) -> (Vec<Finding>, usize) {
    let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());
    let mut discarded = 0;
    for finding in findings {
        if kept.iter().any(|k| is_duplicate(k, &finding, threshold)) {
            debug!("Dropping duplicate finding {} on page {}", finding.span, finding.page_index + 1);
            discarded += 1;
        } else {
            kept.push(finding);
        }
    }
    (kept, discarded)
}

/// Result order: page, then top edge, then left edge (findings without a
/// region first), then severity with errors first.
fn compare(a: &Finding, b: &Finding) -> Ordering {
    let position = |f: &Finding| f.region.map(|r| (r.y, r.x));
    a.page_index
        .cmp(&b.page_index)
        .then_with(|| match (position(a), position(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((ay, ax)), Some((by, bx))) => ay.total_cmp(&by).then(ax.total_cmp(&bx)),
        })
        .then_with(|| b.severity.cmp(&a.severity))
}

/// Overall status from outcomes.
pub fn completion_status(outcomes: &[ChunkOutcome], cancelled: bool) -> CompletionStatus {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    if succeeded == outcomes.len() {
        CompletionStatus::Complete
    } else if cancelled || succeeded > 0 {
        CompletionStatus::Partial
    } else {
        CompletionStatus::Failed
    }
}

/// Merge outcomes into a [`ReviewResult`].
///
/// `stats` is left at its default; the session fills it in.
pub fn reconcile(
    document_id: DocumentId,
    outcomes: &[ChunkOutcome],
    options: &ReconcileOptions,
) -> ReviewResult {
    let mut ordered: Vec<&ChunkOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| o.chunk_index);

    let mut flat: Vec<Finding> = ordered
        .iter()
        .filter(|o| o.status != ChunkStatus::Cancelled)
        .flat_map(|o| o.findings.iter().cloned())
        .collect();
    flat.sort_by_key(|f| (f.span.chunk, f.span.ordinal));

    let (mut findings, duplicates_discarded) = deduplicate(flat, options.similarity_threshold);
    findings.sort_by(compare);

    let mut summary = ReviewSummary {
        duplicates_discarded,
        ..ReviewSummary::default()
    };
    for (i, finding) in findings.iter_mut().enumerate() {
        finding.id = Some(FindingId(i as u32 + 1));
        match finding.severity {
            Severity::Info => summary.info += 1,
            Severity::Warning => summary.warning += 1,
            Severity::Error => summary.error += 1,
        }
    }

    let status = completion_status(outcomes, options.cancelled);
    debug!(
        "Reconciled {} chunk(s): {} finding(s), {} duplicate(s), {:?}",
        outcomes.len(),
        findings.len(),
        duplicates_discarded,
        status
    );

    ReviewResult {
        document_id,
        findings,
        summary,
        status,
        chunks: ordered.iter().map(|o| o.report()).collect(),
        stats: ReviewStats::default(),
    }
}
