//! Plain-text fallback backend on lopdf.
//!
//! lopdf decodes the content streams itself, so it keeps working where
//! pdfium is missing from the host or cannot map a producer's fonts. It has
//! no layout information: each non-blank output line becomes one
//! [`TextBlock`] without a bounding box.

use crate::pipeline::extract::{
    BackendError, BackendPages, ContentBackend, PageRequest, TextBlock,
};
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info};

const NAME: &str = "lopdf";

pub struct LopdfBackend;

impl LopdfBackend {
    fn load(path: &Path, password: Option<&str>) -> Result<Document, BackendError> {
        let mut doc = Document::load(path)
            .map_err(|e| BackendError::new(NAME, format!("cannot open {}: {}", path.display(), e)))?;
        if doc.is_encrypted() {
            match password {
                Some(pw) => doc
                    .decrypt(pw)
                    .map_err(|e| BackendError::new(NAME, format!("decrypt failed: {}", e)))?,
                None => {
                    return Err(BackendError::new(
                        NAME,
                        format!("{} is password protected", path.display()),
                    ))
                }
            }
        }
        Ok(doc)
    }
}

impl ContentBackend for LopdfBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, BackendError> {
        Ok(Self::load(path, password)?.get_pages().len())
    }

    fn extract_pages(
        &self,
        path: &Path,
        password: Option<&str>,
        request: PageRequest<'_>,
    ) -> Result<BackendPages, BackendError> {
        let doc = Self::load(path, password)?;
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let page_count = page_numbers.len();
        info!("lopdf loaded {}: {} pages", path.display(), page_count);

        let pages = request
            .indices(page_count)
            .into_iter()
            .map(|idx| {
                let page_no = page_numbers[idx];
                let result = doc
                    .extract_text(&[page_no])
                    .map(|text| {
                        text.lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(|l| TextBlock::new(l, None))
                            .collect::<Vec<_>>()
                    })
                    .map_err(|e| BackendError::new(NAME, format!("page {}: {}", idx + 1, e)));
                if let Ok(blocks) = &result {
                    debug!("lopdf page {}: {} line(s)", idx + 1, blocks.len());
                }
                (idx, result)
            })
            .collect();

        Ok(BackendPages { page_count, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use tempfile::TempDir;

    /// Write a PDF with one text line per page.
    fn write_pdf(dir: &TempDir, pages: &[&str]) -> std::path::PathBuf {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let path = dir.path().join("sheet.pdf");
        doc.save(&path).unwrap();
        path
    }

    #[test]
    fn counts_pages() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, &["Hello U1", "Hello U2", "Hello U3"]);
        assert_eq!(LopdfBackend.page_count(&path, None).unwrap(), 3);
    }

    #[test]
    fn extracts_requested_pages_only() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, &["Hello first", "Hello second"]);
        let out = LopdfBackend
            .extract_pages(&path, None, PageRequest::Only(&[1, 7]))
            .unwrap();
        assert_eq!(out.page_count, 2);
        assert_eq!(out.pages.len(), 1);
        let (idx, blocks) = &out.pages[0];
        assert_eq!(*idx, 1);
        let text: String = blocks
            .as_ref()
            .unwrap()
            .iter()
            .map(|b| b.text.as_str())
            .collect();
        assert!(text.contains("Hello"), "got {text:?}");
        assert!(blocks.as_ref().unwrap().iter().all(|b| b.bbox.is_none()));
    }

    #[test]
    fn garbage_file_cannot_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.pdf");
        std::fs::write(&path, b"%PDF-1.4\nnot really a pdf").unwrap();
        let err = LopdfBackend.page_count(&path, None).unwrap_err();
        assert_eq!(err.backend, "lopdf");
    }
}
