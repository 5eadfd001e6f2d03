//! Pipeline stages for schematic review.
//!
//! Each submodule implements exactly one step. Keeping stages separate
//! makes each independently testable and lets the extraction backends be
//! swapped without touching chunking or review.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ chunk ──▶ review ──▶ findings ──▶ reconcile
//! (path)   (pdfium/     (budget)  (HTTP +    (grammar)    (dedupe,
//!           lopdf)                 retry)                  order)
//! ```
//!
//! 1. [`input`]: validate the path, MIME type and PDF magic bytes
//! 2. [`extract`]: per-page text via [`pdfium_backend`] with
//!    [`lopdf_backend`] fallback, [`normalize`]d, plus lazy [`raster`]s
//! 3. [`chunk`]: pack pages into character-budget chunks; an optional
//!    [`datasheet`] is extracted alongside and capped for the prompt
//! 4. [`review`]: one `/api/generate` call per chunk, images via
//!    [`encode`]; the only stage with network I/O
//! 5. [`findings`]: parse model output into findings
//! 6. [`reconcile`]: merge, deduplicate, sort and number

pub mod chunk;
pub mod datasheet;
pub mod encode;
pub mod extract;
pub mod findings;
pub mod input;
pub mod lopdf_backend;
pub mod normalize;
pub mod pdfium_backend;
pub mod raster;
pub mod reconcile;
pub mod review;
