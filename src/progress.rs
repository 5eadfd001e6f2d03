//! Progress reporting for review sessions.
//!
//! Two ways to follow a running [`crate::session::ReviewSession`]:
//!
//! * **Push**: inject an [`Arc<dyn ReviewProgressCallback>`] via
//!   [`crate::config::ReviewConfigBuilder::progress_callback`] and receive
//!   events as chunks start and finish.
//! * **Pull**: read the latest [`ProgressSnapshot`] with
//!   [`crate::session::ReviewSession::progress`], or watch it change with
//!   [`crate::session::ReviewSession::subscribe`] /
//!   [`crate::session::ReviewSession::progress_stream`].
//!
//! A GUI usually wants the pull side: it redraws on its own schedule and only
//! needs the latest value, which a `watch` channel gives without queueing.
//!
//! # Example
//!
//! ```rust
//! use selene::{ReviewConfig, ReviewProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ReviewProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk: usize, total: usize, findings: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Chunk {}/{} done ({} findings)", chunk + 1, total, findings);
//!     }
//! }
//!
//! let config = ReviewConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Where a session is in its lifecycle.
///
/// `Done`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Extracting,
    Chunking,
    Reviewing,
    Reconciling,
    Done,
    Cancelled,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Done | SessionPhase::Cancelled | SessionPhase::Failed
        )
    }
}

/// Point-in-time progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: SessionPhase,
    /// Chunks that finished review, successfully or not.
    pub completed: usize,
    /// Chunks in the session; zero until chunking is done.
    pub total: usize,
    /// Of `completed`, how many failed.
    pub failed: usize,
}

impl ProgressSnapshot {
    pub const fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            completed: 0,
            total: 0,
            failed: 0,
        }
    }

    /// Completion in `[0, 1]`; zero while the chunk count is unknown.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Called by the session as it moves through phases and chunks.
///
/// Implementations must be `Send + Sync`: with `parallelism > 1`,
/// `on_chunk_start`, `on_chunk_complete` and `on_chunk_error` are called
/// concurrently. All methods default to no-ops so callers only override
/// what they care about. Chunk indices are 0-based.
pub trait ReviewProgressCallback: Send + Sync {
    /// Called on every phase transition, including into a terminal phase.
    fn on_phase_change(&self, phase: SessionPhase) {
        let _ = phase;
    }

    /// Called once before the first chunk is dispatched.
    fn on_review_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before a chunk's request is sent.
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// Called when a chunk's review succeeded.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, findings: usize) {
        let _ = (chunk, total_chunks, findings);
    }

    /// Called when a chunk failed after all retries.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called once after every chunk was attempted or cancelled.
    fn on_review_complete(&self, total_chunks: usize, succeeded: usize) {
        let _ = (total_chunks, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ReviewProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ReviewConfig`].
pub type ProgressCallback = Arc<dyn ReviewProgressCallback>;

/// Session-side bookkeeping: publishes snapshots and forwards to the
/// callback.
pub(crate) struct ProgressTracker {
    sender: watch::Sender<ProgressSnapshot>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Option<ProgressCallback>) -> Self {
        let (sender, _) = watch::channel(ProgressSnapshot::idle());
        Self { sender, callback }
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        *self.sender.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.sender.subscribe()
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.sender.send_modify(|s| s.phase = phase);
        if let Some(cb) = &self.callback {
            cb.on_phase_change(phase);
        }
    }

    pub(crate) fn review_started(&self, total: usize) {
        self.sender.send_modify(|s| {
            s.total = total;
            s.completed = 0;
            s.failed = 0;
        });
        if let Some(cb) = &self.callback {
            cb.on_review_start(total);
        }
    }

    pub(crate) fn chunk_started(&self, chunk: usize, total: usize) {
        if let Some(cb) = &self.callback {
            cb.on_chunk_start(chunk, total);
        }
    }

    pub(crate) fn chunk_succeeded(&self, chunk: usize, total: usize, findings: usize) {
        self.sender.send_modify(|s| s.completed += 1);
        if let Some(cb) = &self.callback {
            cb.on_chunk_complete(chunk, total, findings);
        }
    }

    pub(crate) fn chunk_failed(&self, chunk: usize, total: usize, error: &str) {
        self.sender.send_modify(|s| {
            s.completed += 1;
            s.failed += 1;
        });
        if let Some(cb) = &self.callback {
            cb.on_chunk_error(chunk, total, error);
        }
    }

    pub(crate) fn review_finished(&self, total: usize, succeeded: usize) {
        if let Some(cb) = &self.callback {
            cb.on_review_complete(total, succeeded);
        }
    }
}
