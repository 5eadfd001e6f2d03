//! Chunking: pack consecutive pages into review-sized groups.
//!
//! Sizes are counted in characters of page text. Pages are taken in order
//! and never split across chunks; a chunk is closed as soon as the next page
//! would push it over the budget. A single page larger than the whole budget
//! gets a chunk of its own, truncated to fit, and the chunk records how much
//! text was dropped.
//!
//! ```text
//! budget 1000, pages [400, 400, 1500]
//!   chunk 0: pages 1-2, size 800
//!   chunk 1: page 3,    size 1000 (truncated from 1500)
//! ```

use crate::pipeline::extract::ContentUnit;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// Record of text dropped from an oversized page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationWarning {
    pub page_index: usize,
    pub original_chars: usize,
    pub kept_chars: usize,
}

/// A group of consecutive pages reviewed in one request.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    /// Non-empty, consecutive pages in order.
    pub units: Vec<ContentUnit>,
    /// Characters of text across `units`.
    pub size: usize,
    pub truncation: Option<TruncationWarning>,
}

impl Chunk {
    pub fn truncated(&self) -> bool {
        self.truncation.is_some()
    }

    /// 0-based index of the first page.
    pub fn first_page(&self) -> usize {
        self.units.first().map(|u| u.page_index).unwrap_or(0)
    }

    /// 0-based index of the last page.
    pub fn last_page(&self) -> usize {
        self.units.last().map(|u| u.page_index).unwrap_or(0)
    }

    pub fn pages(&self) -> RangeInclusive<usize> {
        self.first_page()..=self.last_page()
    }

    pub fn contains_page(&self, page_index: usize) -> bool {
        self.pages().contains(&page_index)
    }

    /// 1-based page label: `"3"` or `"3-5"`.
    pub fn page_label(&self) -> String {
        let (first, last) = (self.first_page() + 1, self.last_page() + 1);
        if first == last {
            first.to_string()
        } else {
            format!("{}-{}", first, last)
        }
    }
}

/// Split `units` into chunks of at most `budget` characters each.
///
/// `budget` of zero is treated as one. Returns no chunks for no units.
pub fn chunk_units(units: &[ContentUnit], budget: usize) -> Vec<Chunk> {
    let budget = budget.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<ContentUnit> = Vec::new();
    let mut current_size = 0usize;

    fn close(chunks: &mut Vec<Chunk>, current: &mut Vec<ContentUnit>, size: &mut usize) {
        if current.is_empty() {
            return;
        }
        chunks.push(Chunk {
            index: chunks.len(),
            units: std::mem::take(current),
            size: *size,
            truncation: None,
        });
        *size = 0;
    }

    for unit in units {
        let size = unit.char_count();

        if size > budget {
            close(&mut chunks, &mut current, &mut current_size);
            let kept = unit.truncated_to(budget);
            let kept_chars = kept.char_count();
            warn!(
                "Page {} has {} chars, truncated to {} (budget {})",
                unit.page_index + 1,
                size,
                kept_chars,
                budget
            );
            chunks.push(Chunk {
                index: chunks.len(),
                units: vec![kept],
                size: kept_chars,
                truncation: Some(TruncationWarning {
                    page_index: unit.page_index,
                    original_chars: size,
                    kept_chars,
                }),
            });
            continue;
        }

        if !current.is_empty() && current_size + size > budget {
            close(&mut chunks, &mut current, &mut current_size);
        }
        current.push(unit.clone());
        current_size += size;
    }
    close(&mut chunks, &mut current, &mut current_size);

    debug!(
        "Chunked {} page(s) into {} chunk(s) (budget {})",
        units.len(),
        chunks.len(),
        budget
    );
    chunks
}
