//! # selene
//!
//! Review electronic schematics with a local vision-language model.
//!
//! ## Why this crate?
//!
//! A schematic review is a page-by-page read for the mistakes that are easy
//! to draw and expensive to build: a floating enable pin, a missing
//! decoupling cap, a regulator run past its rating. This crate extracts the
//! text layer of a schematic PDF (or takes a scanned image), sends it in
//! budget-sized chunks to an Ollama-compatible endpoint together with the
//! page images, and merges what comes back into one deduplicated,
//! page-ordered list of findings a GUI can pin onto the drawing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG / BMP
//!  │
//!  ├─ 1. Input      validate path, MIME type and magic bytes
//!  ├─ 2. Extract    pdfium layout text, lopdf fallback, lazy page rasters,
//!  │               optional reference datasheet
//!  ├─ 3. Chunk      pack pages into character budgets
//!  ├─ 4. Review     concurrent /api/generate calls with retry/backoff
//!  ├─ 5. Parse      tolerant findings grammar per chunk
//!  └─ 6. Reconcile  dedupe, sort, number, summarise
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use selene::{ReviewConfig, ReviewSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReviewConfig::builder().model("llava").build()?;
//!     let mut session = ReviewSession::new(config, "power_board.pdf", "application/pdf")?;
//!     let result = session.run().await?;
//!     for f in &result.findings {
//!         println!("p{} [{}] {}", f.page_index + 1, f.severity, f.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `selene` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library in a GUI:
//! ```toml
//! selene = { version = "0.3", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! pdfium is loaded at runtime from `PDFIUM_LIB_PATH` or the system library
//! path. Without it, PDFs are still reviewed from lopdf-extracted text, but
//! no page images are sent.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ReviewConfig, ReviewConfigBuilder, ReviewFocus};
pub use document::{BoundingBox, Document, DocumentId, DocumentKind, RasterFormat};
pub use error::{ChunkError, SeleneError};
pub use output::{
    ChunkOutcome, ChunkReport, ChunkStatus, CompletionStatus, Finding, FindingId, ReviewResult,
    ReviewStats, ReviewSummary, Severity, SpanId,
};
pub use pipeline::chunk::{chunk_units, Chunk, TruncationWarning};
pub use pipeline::datasheet::Datasheet;
pub use pipeline::extract::{ContentExtractor, ContentUnit, TextBlock, TextSource};
pub use pipeline::input::detect_mime;
pub use pipeline::reconcile::{reconcile, ReconcileOptions};
pub use pipeline::review::{EndpointStatus, ReviewClient};
pub use progress::{
    NoopProgressCallback, ProgressCallback, ProgressSnapshot, ReviewProgressCallback, SessionPhase,
};
pub use session::{CancelHandle, ReviewSession};
