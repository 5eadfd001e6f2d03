//! Normalisation: deterministic cleanup of extracted page text.
//!
//! ## Why normalise before chunking?
//!
//! Chunk sizes are measured in characters, and the review prompt is built
//! straight from the extracted text. PDF text layers carry artefacts that
//! waste budget or confuse the model without carrying any meaning:
//!
//! - typographic ligatures (`ﬁ`, `ﬂ`) that split part numbers into two glyphs
//! - trademark glyphs next to vendor names
//! - zero-width spaces, BOMs and soft hyphens from the PDF producer
//! - "Page 3 of 12" title-block footers repeated on every sheet
//! - runs of spaces used for visual alignment
//!
//! Each rule is a pure `&str → String` pass, applied per text block.
//!
//! ## Rule Order
//!
//! Invisible characters go first so they cannot hide a ligature or a footer
//! from later rules; whitespace collapsing goes last so earlier replacements
//! cannot leave double spaces behind.

use crate::pipeline::extract::TextBlock;
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every normalisation rule to one line of extracted text.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 2. Expand ligatures (`ﬁ` → `fi`, `ﬂ` → `fl`, `ﬀ` → `ff`, ...)
/// 3. Replace trademark glyphs (`™` → `TM`, `®` → `(R)`, `©` → `(C)`)
/// 4. Remove "Page N of M" markers
/// 5. Collapse whitespace runs to a single space and trim
pub fn normalize_text(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = expand_ligatures(&s);
    let s = replace_trademark_glyphs(&s);
    let s = remove_page_markers(&s);
    collapse_whitespace(&s)
}

/// Normalise every block, dropping those left empty.
pub fn normalize_blocks(blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    blocks
        .into_iter()
        .filter_map(|block| {
            let text = normalize_text(&block.text);
            (!text.is_empty()).then_some(TextBlock { text, ..block })
        })
        .collect()
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 2: Expand ligatures ─────────────────────────────────────────────────

const LIGATURES: [(char, &str); 7] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

fn expand_ligatures(input: &str) -> String {
    if !input.chars().any(|c| ('\u{FB00}'..='\u{FB06}').contains(&c)) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, expanded)) => out.push_str(expanded),
            None => out.push(c),
        }
    }
    out
}

// ── Rule 3: Replace trademark glyphs ─────────────────────────────────────────

fn replace_trademark_glyphs(input: &str) -> String {
    input
        .replace('\u{2122}', "TM")
        .replace('\u{00AE}', "(R)")
        .replace('\u{00A9}', "(C)")
}

// ── Rule 4: Remove page markers ──────────────────────────────────────────────

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpage\s+\d+\s+of\s+\d+\b").unwrap());

fn remove_page_markers(input: &str) -> String {
    RE_PAGE_MARKER.replace_all(input, " ").to_string()
}

// ── Rule 5: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BoundingBox;

    #[test]
    fn test_ligatures() {
        assert_eq!(expand_ligatures("con\u{FB01}g \u{FB02}ash"), "config flash");
        assert_eq!(expand_ligatures("e\u{FB03}cient"), "efficient");
        assert_eq!(expand_ligatures("plain"), "plain");
    }

    #[test]
    fn test_trademark_glyphs() {
        assert_eq!(
            replace_trademark_glyphs("ARM\u{2122} Cortex\u{00AE}"),
            "ARMTM Cortex(R)"
        );
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("U\u{200B}1\u{FEFF}"), "U1");
    }

    #[test]
    fn test_page_marker_removed() {
        assert_eq!(normalize_text("Sheet title Page 3 of 12"), "Sheet title");
        assert_eq!(normalize_text("PAGE 1 OF 2"), "");
    }

    #[test]
    fn test_page_word_without_numbers_kept() {
        assert_eq!(normalize_text("see page layout"), "see page layout");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(normalize_text("  R1   10k\t 1%  "), "R1 10k 1%");
    }

    #[test]
    fn test_blocks_dropped_when_empty() {
        let bbox = BoundingBox::clamped(0.1, 0.1, 0.2, 0.05);
        let blocks = vec![
            TextBlock::new("Page 1 of 4", None),
            TextBlock::new("C5  100nF", Some(bbox)),
            TextBlock::new("\u{200B}", None),
        ];
        let cleaned = normalize_blocks(blocks);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].text, "C5 100nF");
        assert_eq!(cleaned[0].bbox, Some(bbox));
    }
}
