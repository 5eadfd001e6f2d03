//! Content extraction: turn a document into one [`ContentUnit`] per page.
//!
//! ## Why two backends?
//!
//! Schematic PDFs come out of every EDA tool ever shipped, and no single text
//! extractor handles them all. The layout backend (pdfium) gives positioned
//! text but chokes on some producers' font encodings; the plain backend
//! (lopdf) reads the content streams directly and often recovers text pdfium
//! returns empty. Extraction tries the layout backend first and falls back
//! per page:
//!
//! ```text
//! layout ok + text   ──▶ Layout
//! layout err / empty ──▶ plain ok + text ──▶ Fallback
//!                        otherwise       ──▶ empty, scanned = true
//! ```
//!
//! If the layout backend cannot open the file at all, the plain backend
//! handles every page. Only when neither can open it does extraction fail.
//!
//! Scanned pages are not an error: the reviewer gets the page image instead.

use crate::config::ReviewConfig;
use crate::document::{BoundingBox, Document, DocumentId, DocumentKind};
use crate::error::SeleneError;
use crate::pipeline::input::resolve_input;
use crate::pipeline::lopdf_backend::LopdfBackend;
use crate::pipeline::normalize::normalize_blocks;
use crate::pipeline::pdfium_backend::{PdfiumBackend, PdfiumRasterizer};
use crate::pipeline::raster::{enhance_for_review, fit_within, PageRaster, RasterSource};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Content model ────────────────────────────────────────────────────────────

/// A contiguous run of text, optionally positioned on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub bbox: Option<BoundingBox>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bbox: Option<BoundingBox>) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// Which backend produced a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    Layout,
    Fallback,
    None,
}

/// Extracted content of one page.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    /// 0-based.
    pub page_index: usize,
    pub blocks: Vec<TextBlock>,
    /// True when no text could be extracted.
    pub scanned: bool,
    pub source: TextSource,
    pub raster: Option<Arc<PageRaster>>,
}

impl ContentUnit {
    /// Build a unit. `scanned` is derived from the blocks: a unit without any
    /// non-blank text is scanned, whatever `source` says.
    pub fn new(
        page_index: usize,
        blocks: Vec<TextBlock>,
        source: TextSource,
        raster: Option<Arc<PageRaster>>,
    ) -> Self {
        let scanned = !blocks.iter().any(|b| !b.text.trim().is_empty());
        Self {
            page_index,
            blocks,
            scanned,
            source: if scanned { TextSource::None } else { source },
            raster,
        }
    }

    /// Page text, one block per line.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Size of [`Self::text`] in characters.
    pub fn char_count(&self) -> usize {
        let chars: usize = self.blocks.iter().map(|b| b.text.chars().count()).sum();
        chars + self.blocks.len().saturating_sub(1)
    }

    /// A copy whose [`Self::text`] is the first `max_chars` characters of
    /// this unit's text, or all of it when shorter.
    ///
    /// Cuts at block granularity, splitting only the last kept block (on a
    /// character boundary). When the cut falls right after a line break the
    /// last kept block is empty. Positions of kept blocks are preserved.
    pub fn truncated_to(&self, max_chars: usize) -> ContentUnit {
        let mut remaining = max_chars;
        let mut kept: Vec<TextBlock> = Vec::new();
        for block in &self.blocks {
            if remaining == 0 {
                break;
            }
            if !kept.is_empty() {
                // separator
                remaining -= 1;
            }
            let len = block.text.chars().count();
            if len <= remaining {
                kept.push(block.clone());
                remaining -= len;
            } else {
                let cut: String = block.text.chars().take(remaining).collect();
                kept.push(TextBlock::new(cut, block.bbox));
                break;
            }
        }
        ContentUnit {
            page_index: self.page_index,
            blocks: kept,
            scanned: self.scanned,
            source: self.source,
            raster: self.raster.clone(),
        }
    }
}

// ── Backends ─────────────────────────────────────────────────────────────────

/// A backend failure, either for the whole file or for one page.
#[derive(Debug, Clone, Error)]
#[error("{backend}: {detail}")]
pub struct BackendError {
    pub backend: &'static str,
    pub detail: String,
}

impl BackendError {
    pub fn new(backend: &'static str, detail: impl Into<String>) -> Self {
        Self {
            backend,
            detail: detail.into(),
        }
    }
}

/// Which pages a backend should extract.
#[derive(Debug, Clone, Copy)]
pub enum PageRequest<'a> {
    All,
    Only(&'a [usize]),
}

impl PageRequest<'_> {
    pub fn indices(&self, page_count: usize) -> Vec<usize> {
        match self {
            PageRequest::All => (0..page_count).collect(),
            PageRequest::Only(pages) => pages.iter().copied().filter(|&p| p < page_count).collect(),
        }
    }
}

/// Per-page text, or the reason that page failed.
pub type PageExtraction = Result<Vec<TextBlock>, BackendError>;

/// What a backend returned for one document.
#[derive(Debug)]
pub struct BackendPages {
    pub page_count: usize,
    pub pages: Vec<(usize, PageExtraction)>,
}

/// A PDF text extractor.
///
/// Both methods block. An outer `Err` means the file could not be opened;
/// per-page failures go in [`BackendPages::pages`].
pub trait ContentBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, BackendError>;

    fn extract_pages(
        &self,
        path: &Path,
        password: Option<&str>,
        request: PageRequest<'_>,
    ) -> Result<BackendPages, BackendError>;
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Opens documents and extracts their content with layout + fallback
/// backends.
#[derive(Clone)]
pub struct ContentExtractor {
    primary: Arc<dyn ContentBackend>,
    fallback: Arc<dyn ContentBackend>,
    max_width: u32,
    max_height: u32,
}

impl ContentExtractor {
    /// pdfium layout backend with lopdf fallback.
    pub fn new(config: &ReviewConfig) -> Self {
        Self::with_backends(Arc::new(PdfiumBackend), Arc::new(LopdfBackend), config)
    }

    pub fn with_backends(
        primary: Arc<dyn ContentBackend>,
        fallback: Arc<dyn ContentBackend>,
        config: &ReviewConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            max_width: config.max_image_width,
            max_height: config.max_image_height,
        }
    }

    /// Validate the file and count its pages.
    pub async fn open_document(
        &self,
        id: DocumentId,
        path: &Path,
        mime: &str,
        password: Option<&str>,
    ) -> Result<Document, SeleneError> {
        let this = self.clone();
        let path = path.to_path_buf();
        let mime = mime.to_string();
        let password = password.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            this.open_document_blocking(id, &path, &mime, password)
        })
        .await
        .map_err(|e| SeleneError::Internal(format!("Open task panicked: {}", e)))?
    }

    fn open_document_blocking(
        &self,
        id: DocumentId,
        path: &Path,
        mime: &str,
        password: Option<String>,
    ) -> Result<Document, SeleneError> {
        let input = resolve_input(path, mime)?;

        let page_count = match input.kind {
            DocumentKind::Image(_) => {
                image::image_dimensions(&input.path).map_err(|e| {
                    SeleneError::ExtractionFailed {
                        path: input.path.clone(),
                        detail: format!("image could not be read: {}", e),
                    }
                })?;
                1
            }
            DocumentKind::Pdf => {
                let pw = password.as_deref();
                match self.primary.page_count(&input.path, pw) {
                    Ok(n) => n,
                    Err(primary_err) => {
                        debug!("{}; trying {}", primary_err, self.fallback.name());
                        self.fallback.page_count(&input.path, pw).map_err(|fallback_err| {
                            SeleneError::ExtractionFailed {
                                path: input.path.clone(),
                                detail: format!("{}; {}", primary_err, fallback_err),
                            }
                        })?
                    }
                }
            }
        };

        if page_count == 0 {
            return Err(SeleneError::NoPages { path: input.path });
        }

        info!(
            "Opened {} ({}, {} page(s))",
            input.path.display(),
            input.mime,
            page_count
        );
        Ok(Document::new(id, input.path, input.kind, page_count, password))
    }

    /// Extract one unit per page, in page order.
    pub async fn extract(&self, document: &Document) -> Result<Vec<ContentUnit>, SeleneError> {
        let this = self.clone();
        let document = document.clone();
        tokio::task::spawn_blocking(move || this.extract_blocking(&document))
            .await
            .map_err(|e| SeleneError::Internal(format!("Extraction task panicked: {}", e)))?
    }

    /// Blocking form of [`Self::extract`].
    pub fn extract_blocking(&self, document: &Document) -> Result<Vec<ContentUnit>, SeleneError> {
        match document.kind {
            DocumentKind::Image(_) => self.extract_image(document),
            DocumentKind::Pdf => self.extract_pdf(document),
        }
    }

    fn extract_image(&self, document: &Document) -> Result<Vec<ContentUnit>, SeleneError> {
        let img = decode_upright(&document.path).map_err(|detail| SeleneError::ExtractionFailed {
            path: document.path.clone(),
            detail,
        })?;
        let img = enhance_for_review(fit_within(img, self.max_width, self.max_height));
        let raster = Arc::new(PageRaster::ready(0, img));
        Ok(vec![ContentUnit::new(
            0,
            Vec::new(),
            TextSource::None,
            Some(raster),
        )])
    }

    fn extract_pdf(&self, document: &Document) -> Result<Vec<ContentUnit>, SeleneError> {
        let path = document.path();
        let password = document.password();
        let page_count = document.page_count;

        let mut texts: Vec<Option<(Vec<TextBlock>, TextSource)>> = vec![None; page_count];

        match self.primary.extract_pages(path, password, PageRequest::All) {
            Ok(out) => {
                if out.page_count != page_count {
                    warn!(
                        "{} reports {} pages, expected {}",
                        self.primary.name(),
                        out.page_count,
                        page_count
                    );
                }
                fill(&mut texts, out.pages, TextSource::Layout, self.primary.name());

                let missing: Vec<usize> = (0..page_count).filter(|&i| texts[i].is_none()).collect();
                if !missing.is_empty() {
                    debug!(
                        "{} page(s) without layout text, trying {}",
                        missing.len(),
                        self.fallback.name()
                    );
                    match self
                        .fallback
                        .extract_pages(path, password, PageRequest::Only(&missing))
                    {
                        Ok(fb) => fill(&mut texts, fb.pages, TextSource::Fallback, self.fallback.name()),
                        Err(e) => warn!("Fallback extraction unavailable: {}", e),
                    }
                }
            }
            Err(primary_err) => {
                info!(
                    "{}; extracting every page with {}",
                    primary_err,
                    self.fallback.name()
                );
                let out = self
                    .fallback
                    .extract_pages(path, password, PageRequest::All)
                    .map_err(|fallback_err| SeleneError::ExtractionFailed {
                        path: path.to_path_buf(),
                        detail: format!("{}; {}", primary_err, fallback_err),
                    })?;
                fill(&mut texts, out.pages, TextSource::Fallback, self.fallback.name());
            }
        }

        // Rasters are lazy; pages nobody looks at are never rendered.
        let rasterizer: Arc<dyn RasterSource> = Arc::new(PdfiumRasterizer::new(
            path.to_path_buf(),
            password.map(str::to_string),
            self.max_width,
            self.max_height,
        ));

        let units: Vec<ContentUnit> = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let (blocks, source) = text.unwrap_or((Vec::new(), TextSource::None));
                let raster = Arc::new(PageRaster::new(idx, rasterizer.clone()));
                ContentUnit::new(idx, blocks, source, Some(raster))
            })
            .collect();

        let scanned = units.iter().filter(|u| u.scanned).count();
        info!(
            "Extracted {} page(s): {} with text, {} scanned",
            units.len(),
            units.len() - scanned,
            scanned
        );
        Ok(units)
    }
}

/// Store non-empty page texts into unfilled slots.
/// Decode an image file and apply its EXIF orientation, so photographed
/// sheets reach the model the right way up.
fn decode_upright(path: &Path) -> Result<DynamicImage, String> {
    let mut decoder = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| e.to_string())?
        .into_decoder()
        .map_err(|e| e.to_string())?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        debug!("No orientation for {}: {}", path.display(), e);
        Orientation::NoTransforms
    });
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| e.to_string())?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn fill(
    texts: &mut [Option<(Vec<TextBlock>, TextSource)>],
    pages: Vec<(usize, PageExtraction)>,
    source: TextSource,
    backend: &str,
) {
    for (idx, result) in pages {
        let Some(slot) = texts.get_mut(idx) else {
            continue;
        };
        if slot.is_some() {
            continue;
        }
        match result {
            Ok(blocks) => {
                let blocks = normalize_blocks(blocks);
                if !blocks.is_empty() {
                    *slot = Some((blocks, source));
                }
            }
            Err(e) => debug!("{} failed on page {}: {}", backend, idx + 1, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ── Content model ────────────────────────────────────────────────────

    fn unit(texts: &[&str]) -> ContentUnit {
        ContentUnit::new(
            0,
            texts.iter().map(|t| TextBlock::new(*t, None)).collect(),
            TextSource::Layout,
            None,
        )
    }

    #[test]
    fn empty_unit_is_scanned() {
        let u = ContentUnit::new(2, vec![TextBlock::new("   ", None)], TextSource::Layout, None);
        assert!(u.scanned);
        assert_eq!(u.source, TextSource::None);
        assert_eq!(u.page_index, 2);
    }

    #[test]
    fn char_count_matches_text() {
        let u = unit(&["R1 10k", "Ω Ohm", "C2"]);
        assert_eq!(u.char_count(), u.text().chars().count());
    }

    #[test]
    fn truncation_keeps_exactly_the_limit() {
        let u = unit(&["abcdef", "ghij", "klmnop"]);
        for limit in 0..=25 {
            let t = u.truncated_to(limit);
            assert_eq!(t.char_count(), limit.min(u.char_count()), "limit {limit}");
            assert_eq!(t.char_count(), t.text().chars().count());
            assert!(u.text().starts_with(&t.text()));
        }
    }

    #[test]
    fn truncation_ending_on_a_line_break_keeps_it() {
        let u = unit(&["aaaa", "bbbbbbb"]);
        let t = u.truncated_to(5);
        assert_eq!(t.text(), "aaaa\n");
        assert_eq!(t.char_count(), 5);
        assert_eq!(t.blocks.len(), 2);
    }

    #[test]
    fn truncation_splits_on_char_boundary() {
        let u = unit(&["µΩµΩµΩ"]);
        let t = u.truncated_to(3);
        assert_eq!(t.text(), "µΩµ");
    }

    #[test]
    fn truncation_keeps_block_boxes() {
        let bbox = BoundingBox::clamped(0.1, 0.2, 0.3, 0.1);
        let u = ContentUnit::new(
            0,
            vec![TextBlock::new("0123456789", Some(bbox))],
            TextSource::Layout,
            None,
        );
        assert_eq!(u.truncated_to(4).blocks[0].bbox, Some(bbox));
    }

    // ── Fallback policy ──────────────────────────────────────────────────

    /// Backend with scripted per-page results.
    struct Scripted {
        name: &'static str,
        opens: bool,
        page_count: usize,
        pages: HashMap<usize, Result<&'static str, &'static str>>,
        requests: Mutex<Vec<Vec<usize>>>,
    }

    impl Scripted {
        fn new(name: &'static str, page_count: usize) -> Self {
            Self {
                name,
                opens: true,
                page_count,
                pages: HashMap::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn page(mut self, idx: usize, result: Result<&'static str, &'static str>) -> Self {
            self.pages.insert(idx, result);
            self
        }

        fn closed(mut self) -> Self {
            self.opens = false;
            self
        }
    }

    impl ContentBackend for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn page_count(&self, _: &Path, _: Option<&str>) -> Result<usize, BackendError> {
            if self.opens {
                Ok(self.page_count)
            } else {
                Err(BackendError::new(self.name, "cannot open"))
            }
        }

        fn extract_pages(
            &self,
            path: &Path,
            password: Option<&str>,
            request: PageRequest<'_>,
        ) -> Result<BackendPages, BackendError> {
            let page_count = self.page_count(path, password)?;
            let indices = request.indices(page_count);
            self.requests.lock().unwrap().push(indices.clone());
            let pages = indices
                .into_iter()
                .map(|i| {
                    let r = match self.pages.get(&i) {
                        Some(Ok(text)) => Ok(vec![TextBlock::new(*text, None)]),
                        Some(Err(e)) => Err(BackendError::new(self.name, *e)),
                        None => Ok(Vec::new()),
                    };
                    (i, r)
                })
                .collect();
            Ok(BackendPages { page_count, pages })
        }
    }

    fn config() -> ReviewConfig {
        ReviewConfig {
            embed_images: false,
            ..ReviewConfig::default()
        }
    }

    fn pdf(page_count: usize) -> Document {
        Document::new(
            DocumentId::new(),
            "/virtual/board.pdf".into(),
            DocumentKind::Pdf,
            page_count,
            None,
        )
    }

    #[test]
    fn fallback_fills_failed_and_empty_pages_only() {
        let primary = Arc::new(
            Scripted::new("layout", 4)
                .page(0, Ok("U1 MCU"))
                .page(1, Err("bad font"))
                .page(3, Ok("J1 header")),
        );
        let fallback = Arc::new(
            Scripted::new("plain", 4)
                .page(1, Ok("R5 4k7"))
                .page(2, Ok("")),
        );
        let extractor = ContentExtractor::with_backends(primary, fallback.clone(), &config());
        let units = extractor.extract_blocking(&pdf(4)).unwrap();

        assert_eq!(units.len(), 4);
        assert_eq!(units[0].source, TextSource::Layout);
        assert_eq!(units[1].source, TextSource::Fallback);
        assert_eq!(units[1].text(), "R5 4k7");
        assert!(units[2].scanned);
        assert_eq!(units[3].source, TextSource::Layout);
        assert_eq!(*fallback.requests.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[test]
    fn unopenable_primary_hands_every_page_to_fallback() {
        let primary = Arc::new(Scripted::new("layout", 2).closed());
        let fallback = Arc::new(Scripted::new("plain", 2).page(0, Ok("Q1")).page(1, Ok("Q2")));
        let extractor = ContentExtractor::with_backends(primary, fallback, &config());
        let units = extractor.extract_blocking(&pdf(2)).unwrap();
        assert!(units.iter().all(|u| u.source == TextSource::Fallback));
    }

    #[test]
    fn both_backends_closed_is_extraction_failure() {
        let primary = Arc::new(Scripted::new("layout", 2).closed());
        let fallback = Arc::new(Scripted::new("plain", 2).closed());
        let extractor = ContentExtractor::with_backends(primary, fallback, &config());
        let err = extractor.extract_blocking(&pdf(2)).unwrap_err();
        match err {
            SeleneError::ExtractionFailed { detail, .. } => {
                assert!(detail.contains("layout"));
                assert!(detail.contains("plain"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn text_is_normalized() {
        let primary = Arc::new(Scripted::new("layout", 1).page(0, Ok("con\u{FB01}g  pin  Page 1 of 1")));
        let fallback = Arc::new(Scripted::new("plain", 1));
        let extractor = ContentExtractor::with_backends(primary, fallback, &config());
        let units = extractor.extract_blocking(&pdf(1)).unwrap();
        assert_eq!(units[0].text(), "config pin");
    }

    #[test]
    fn every_page_gets_a_lazy_raster() {
        let primary = Arc::new(Scripted::new("layout", 2).page(0, Ok("text")));
        let fallback = Arc::new(Scripted::new("plain", 2));
        let extractor = ContentExtractor::with_backends(primary, fallback, &config());
        let units = extractor.extract_blocking(&pdf(2)).unwrap();
        assert!(units.iter().all(|u| u.raster.is_some()));
        assert!(units.iter().all(|u| !u.raster.as_ref().unwrap().is_materialized()));
    }

    #[tokio::test]
    async fn zero_pages_is_no_pages_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%%EOF\n").unwrap();

        let primary = Arc::new(Scripted::new("layout", 0));
        let fallback = Arc::new(Scripted::new("plain", 0));
        let extractor = ContentExtractor::with_backends(primary, fallback, &config());
        let err = extractor
            .open_document(DocumentId::new(), &path, "application/pdf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SeleneError::NoPages { .. }));
    }

    #[tokio::test]
    async fn image_document_is_one_scanned_unit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        image::RgbImage::new(4000, 1000).save(&path).unwrap();

        let extractor = ContentExtractor::new(&ReviewConfig::default());
        let doc = extractor
            .open_document(DocumentId::new(), &path, "image/png", None)
            .await
            .unwrap();
        assert_eq!(doc.page_count, 1);

        let units = extractor.extract(&doc).await.unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].scanned);
        let img = units[0].raster.as_ref().unwrap().materialize().unwrap();
        assert!(img.width() <= 1920 && img.height() <= 1080);
    }

    #[tokio::test]
    async fn image_document_is_enhanced() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        image::RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                image::Rgb([100, 100, 100])
            } else {
                image::Rgb([160, 160, 160])
            }
        })
        .save(&path)
        .unwrap();

        let extractor = ContentExtractor::new(&ReviewConfig::default());
        let doc = extractor
            .open_document(DocumentId::new(), &path, "image/png", None)
            .await
            .unwrap();
        let units = extractor.extract(&doc).await.unwrap();
        let img = units[0].raster.as_ref().unwrap().materialize().unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (32, 32));
        assert!(img.get_pixel(0, 0)[0] < 100);
        assert!(img.get_pixel(31, 31)[0] > 160);
    }
}
