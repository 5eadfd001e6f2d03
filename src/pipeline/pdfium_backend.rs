//! Layout backend and page rasteriser, both on pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to call from async contexts. Everything here is
//! blocking and is driven from `tokio::task::spawn_blocking` by
//! [`crate::pipeline::extract::ContentExtractor`] and the review stage.
//!
//! ## Why group segments into lines?
//!
//! pdfium reports text as segments, runs of characters sharing one font and
//! baseline. EDA exports split a single label ("R12 4.7k 0603") into several
//! segments. Segments whose vertical centre falls inside the previous line's
//! band are merged, giving one [`TextBlock`] per visual line with a bounding
//! box the reviewer can point at.

use crate::document::BoundingBox;
use crate::error::SeleneError;
use crate::pipeline::extract::{
    BackendError, BackendPages, ContentBackend, PageRequest, TextBlock,
};
use crate::pipeline::raster::{fit_within, RasterSource};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NAME: &str = "pdfium";

/// Bind to pdfium: `PDFIUM_LIB_PATH` if set, otherwise the system library.
pub fn bind_pdfium() -> Result<Pdfium, SeleneError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path)
            .map_err(|e| SeleneError::PdfiumBindingFailed(format!("{}: {}", path, e)))?,
        _ => Pdfium::bind_to_system_library()
            .map_err(|e| SeleneError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

fn open_error(path: &Path, password: Option<&str>, e: PdfiumError) -> BackendError {
    let detail = format!("{:?}", e);
    let lower = detail.to_ascii_lowercase();
    if lower.contains("password") {
        if password.is_some() {
            BackendError::new(NAME, format!("wrong password for {}", path.display()))
        } else {
            BackendError::new(NAME, format!("{} is password protected", path.display()))
        }
    } else {
        BackendError::new(NAME, format!("cannot open {}: {}", path.display(), detail))
    }
}

/// Text extraction with per-line bounding boxes.
pub struct PdfiumBackend;

impl ContentBackend for PdfiumBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, BackendError> {
        let pdfium = bind_pdfium().map_err(|e| BackendError::new(NAME, e.to_string()))?;
        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| open_error(path, password, e))?;
        Ok(document.pages().len() as usize)
    }

    fn extract_pages(
        &self,
        path: &Path,
        password: Option<&str>,
        request: PageRequest<'_>,
    ) -> Result<BackendPages, BackendError> {
        let pdfium = bind_pdfium().map_err(|e| BackendError::new(NAME, e.to_string()))?;
        let document = pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| open_error(path, password, e))?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        info!("pdfium loaded {}: {} pages", path.display(), page_count);

        let results = request
            .indices(page_count)
            .into_iter()
            .map(|idx| {
                let result = pages
                    .get(idx as u16)
                    .map_err(|e| BackendError::new(NAME, format!("page {}: {:?}", idx + 1, e)))
                    .and_then(|page| {
                        page_blocks(&page).map_err(|e| {
                            BackendError::new(NAME, format!("page {} text: {:?}", idx + 1, e))
                        })
                    });
                if let Ok(blocks) = &result {
                    debug!("pdfium page {}: {} line(s)", idx + 1, blocks.len());
                }
                (idx, result)
            })
            .collect();

        Ok(BackendPages {
            page_count,
            pages: results,
        })
    }
}

/// One visual line under construction, in PDF points (origin bottom-left).
struct Line {
    text: String,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

fn page_blocks(page: &PdfPage) -> Result<Vec<TextBlock>, PdfiumError> {
    let page_width = page.width().value;
    let page_height = page.height().value;
    let text = page.text()?;

    let mut lines: Vec<Line> = Vec::new();
    for segment in text.segments().iter() {
        let s = segment.text();
        let s = s.trim();
        if s.is_empty() {
            continue;
        }
        let r = segment.bounds();
        let (left, top, right, bottom) =
            (r.left().value, r.top().value, r.right().value, r.bottom().value);
        let mid = (top + bottom) / 2.0;

        match lines.last_mut() {
            Some(line) if mid <= line.top && mid >= line.bottom => {
                line.text.push(' ');
                line.text.push_str(s);
                line.left = line.left.min(left);
                line.right = line.right.max(right);
                line.top = line.top.max(top);
                line.bottom = line.bottom.min(bottom);
            }
            _ => lines.push(Line {
                text: s.to_string(),
                left,
                top,
                right,
                bottom,
            }),
        }
    }

    Ok(lines
        .into_iter()
        .map(|line| {
            let bbox = (page_width > 0.0 && page_height > 0.0).then(|| {
                BoundingBox::clamped(
                    line.left / page_width,
                    (page_height - line.top) / page_height,
                    (line.right - line.left) / page_width,
                    (line.top - line.bottom) / page_height,
                )
            });
            TextBlock::new(line.text, bbox)
        })
        .collect())
}

/// Renders PDF pages on demand, reopening the document per render.
pub struct PdfiumRasterizer {
    path: PathBuf,
    password: Option<String>,
    max_width: u32,
    max_height: u32,
}

impl PdfiumRasterizer {
    pub fn new(path: PathBuf, password: Option<String>, max_width: u32, max_height: u32) -> Self {
        Self {
            path,
            password,
            max_width,
            max_height,
        }
    }
}

impl RasterSource for PdfiumRasterizer {
    fn render(&self, page_index: usize) -> Result<DynamicImage, String> {
        let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
        let password = self.password.as_deref();
        let document = pdfium
            .load_pdf_from_file(&self.path, password)
            .map_err(|e| open_error(&self.path, password, e).to_string())?;
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| format!("page {}: {:?}", page_index + 1, e))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_width as i32)
            .set_maximum_height(self.max_height as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("render page {}: {:?}", page_index + 1, e))?;

        Ok(fit_within(bitmap.as_image(), self.max_width, self.max_height))
    }
}
