//! Reference datasheet: the text of a component datasheet, capped to a
//! character budget, that every review prompt carries alongside the
//! schematic pages.
//!
//! The datasheet goes through the same [`ContentExtractor`] as the
//! schematic, so a scanned datasheet simply contributes no text. The cap
//! applies to the joined page text and keeps long datasheets from crowding
//! the schematic out of the model's context.

use crate::document::DocumentId;
use crate::error::SeleneError;
use crate::pipeline::extract::{ContentExtractor, ContentUnit};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Extracted datasheet text, ready for the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Datasheet {
    pub path: PathBuf,
    /// Part number found near the top of the first page, if any.
    pub part_number: Option<String>,
    pub page_count: usize,
    /// Page text, joined and capped.
    pub text: String,
    /// Characters before the cap was applied.
    pub original_chars: usize,
}

impl Datasheet {
    /// Build from extracted pages, keeping at most `max_chars` characters.
    pub fn from_units(path: impl Into<PathBuf>, units: &[ContentUnit], max_chars: usize) -> Self {
        let full = units
            .iter()
            .filter(|u| !u.scanned)
            .map(|u| u.text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let original_chars = full.chars().count();
        let text: String = full.chars().take(max_chars).collect();
        Self {
            path: path.into(),
            part_number: part_number(&full),
            page_count: units.len(),
            text,
            original_chars,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn truncated(&self) -> bool {
        self.char_count() < self.original_chars
    }

    /// Open, extract and cap the datasheet at `path`.
    ///
    /// # Errors
    /// [`SeleneError::Datasheet`] wrapping whatever stopped the file from
    /// being read. A datasheet with no extractable text is not an error;
    /// it is logged and yields an empty reference.
    pub async fn load(
        extractor: &ContentExtractor,
        path: &Path,
        max_chars: usize,
    ) -> Result<Self, SeleneError> {
        let wrap = |e: SeleneError| SeleneError::Datasheet {
            path: path.to_path_buf(),
            source: Box::new(e),
        };
        let document = extractor
            .open_document(DocumentId::new(), path, "application/pdf", None)
            .await
            .map_err(wrap)?;
        let units = extractor.extract(&document).await.map_err(wrap)?;
        let sheet = Self::from_units(path, &units, max_chars);

        if sheet.original_chars == 0 {
            warn!("Datasheet {} has no extractable text", path.display());
        } else if sheet.truncated() {
            warn!(
                "Datasheet {} cut to {} of {} chars",
                path.display(),
                sheet.char_count(),
                sheet.original_chars
            );
        }
        info!(
            "Datasheet {} ({}, {} page(s), {} chars)",
            path.display(),
            sheet.part_number.as_deref().unwrap_or("part unknown"),
            sheet.page_count,
            sheet.char_count()
        );
        Ok(sheet)
    }
}

static RE_PART_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}\d{2,}[A-Z0-9]*(?:-[A-Z0-9]+)?\b").unwrap());

/// Manufacturer part numbers (LM317, TPS54331, STM32F103C8) are letters
/// followed by at least two digits. Only the first 1000 characters are
/// searched, where the title block sits.
fn part_number(text: &str) -> Option<String> {
    let head: String = text.chars().take(1000).collect();
    RE_PART_NUMBER
        .find(&head)
        .map(|m| m.as_str().to_string())
}
