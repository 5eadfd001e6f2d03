//! Error types for the selene review core.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SeleneError`] (**fatal**): the session cannot produce a result at all
//!   (unsupported file type, unreadable document, every chunk failed).
//!   Returned as `Err(SeleneError)` from [`crate::session::ReviewSession::run`].
//!
//! * [`ChunkError`] (**non-fatal**): a single chunk failed (endpoint down
//!   after retries, payload rejected, unparseable model output) while the
//!   other chunks are fine. Stored inside [`crate::output::ChunkOutcome`] so
//!   callers get a `partial` result rather than losing the whole document.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the selene library.
///
/// Chunk-level failures use [`ChunkError`] and are stored in
/// [`crate::output::ChunkOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SeleneError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The detected MIME type is neither a PDF nor a supported raster format.
    #[error("Unsupported document type '{mime}' for '{path}'\nSupported: PDF, PNG, JPEG, BMP.")]
    UnsupportedType { path: PathBuf, mime: String },

    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file was declared as a PDF but does not start with `%PDF`.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Neither extraction backend could open the document.
    #[error("Could not extract '{path}': {detail}")]
    ExtractionFailed { path: PathBuf, detail: String },

    /// The document opened but produced zero pages.
    #[error("Document '{path}' contains no pages")]
    NoPages { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use a specific copy, or install\n\
pdfium into the system library search path.\n"
    )]
    PdfiumBindingFailed(String),

    /// The reference datasheet could not be read.
    #[error("Could not read datasheet '{path}': {source}")]
    Datasheet {
        path: PathBuf,
        #[source]
        source: Box<SeleneError>,
    },

    // ── Review errors ─────────────────────────────────────────────────────
    /// The HTTP client for the model endpoint could not be constructed.
    #[error("Failed to build HTTP client for '{endpoint}': {detail}")]
    HttpClient { endpoint: String, detail: String },

    /// Every chunk failed; there is nothing to reconcile.
    #[error("All {total} chunks failed review.\nFirst error: {first_error}")]
    AllChunksFailed { total: usize, first_error: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chunk.
///
/// Stored alongside [`crate::output::ChunkOutcome`] when a chunk fails.
/// The session continues unless ALL chunks fail.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ChunkError {
    /// Transport failure (timeout, connection refused, 5xx) that survived
    /// every retry.
    #[error("Chunk {chunk}: endpoint unreachable after {attempts} attempts: {detail}")]
    Network {
        chunk: usize,
        attempts: u32,
        detail: String,
    },

    /// The endpoint answered with a 4xx status; never retried.
    #[error("Chunk {chunk}: request rejected with HTTP {status}: {detail}")]
    Rejected {
        chunk: usize,
        status: u16,
        detail: String,
    },

    /// The model answered but its output does not follow the findings schema.
    #[error("Chunk {chunk}: model output could not be parsed: {detail}")]
    Parse { chunk: usize, detail: String },

    /// The endpoint reported an error inside an otherwise successful response.
    #[error("Chunk {chunk}: model reported an error: {detail}")]
    Model { chunk: usize, detail: String },

    /// The session was cancelled before the chunk produced a usable result.
    #[error("Chunk {chunk}: cancelled")]
    Cancelled { chunk: usize },
}

impl ChunkError {
    /// Index of the chunk this error belongs to.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::Network { chunk, .. }
            | ChunkError::Rejected { chunk, .. }
            | ChunkError::Parse { chunk, .. }
            | ChunkError::Model { chunk, .. }
            | ChunkError::Cancelled { chunk } => *chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_chunks_failed_display() {
        let e = SeleneError::AllChunksFailed {
            total: 4,
            first_error: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 4 chunks"), "got: {msg}");
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn unsupported_type_names_mime() {
        let e = SeleneError::UnsupportedType {
            path: PathBuf::from("board.svg"),
            mime: "image/svg+xml".into(),
        };
        assert!(e.to_string().contains("image/svg+xml"));
    }

    #[test]
    fn datasheet_error_names_both_causes() {
        let e = SeleneError::Datasheet {
            path: PathBuf::from("lm317.pdf"),
            source: Box::new(SeleneError::FileNotFound {
                path: PathBuf::from("lm317.pdf"),
            }),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("Could not read datasheet 'lm317.pdf'"), "got: {msg}");
        assert!(msg.contains("Document not found"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn rejected_display_has_status() {
        let e = ChunkError::Rejected {
            chunk: 2,
            status: 413,
            detail: "payload too large".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("413"));
        assert!(msg.contains("Chunk 2"));
        assert_eq!(e.chunk(), 2);
    }

    #[test]
    fn chunk_error_roundtrips_through_json() {
        let e = ChunkError::Network {
            chunk: 1,
            attempts: 4,
            detail: "timed out".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: ChunkError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
