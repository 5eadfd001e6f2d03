//! Source documents and page geometry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier of a loaded document, unique per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raster formats accepted as single-page documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterFormat {
    Png,
    Jpeg,
    Bmp,
}

/// What kind of document a file is, as decided from its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Image(RasterFormat),
}

impl DocumentKind {
    /// Map a MIME type to a document kind. Parameters (`; charset=…`) and
    /// case are ignored. Returns `None` for anything unsupported.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Some(DocumentKind::Pdf),
            "image/png" => Some(DocumentKind::Image(RasterFormat::Png)),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => {
                Some(DocumentKind::Image(RasterFormat::Jpeg))
            }
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => {
                Some(DocumentKind::Image(RasterFormat::Bmp))
            }
            _ => None,
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, DocumentKind::Pdf)
    }
}

/// A document opened for review.
///
/// Created by [`crate::pipeline::extract::ContentExtractor::open_document`]
/// and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub page_count: usize,
    #[serde(skip)]
    pub(crate) password: Option<String>,
}

impl Document {
    pub(crate) fn new(
        id: DocumentId,
        path: PathBuf,
        kind: DocumentKind,
        page_count: usize,
        password: Option<String>,
    ) -> Self {
        Self {
            id,
            path,
            kind,
            page_count,
            password,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display, falling back to the full path.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

/// An axis-aligned box in page-relative coordinates.
///
/// All four values are fractions of the page size: origin at the top-left
/// corner, `x`/`width` along the page width, `y`/`height` down the page
/// height. Text blocks and finding regions share this space, so a finding can
/// be matched against the text it refers to regardless of render resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a box, clamping every edge into the unit square.
    pub fn clamped(x: f32, y: f32, width: f32, height: f32) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: width.clamp(0.0, 1.0 - x),
            height: height.clamp(0.0, 1.0 - y),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// True when the boxes share at least one point. Touching edges count,
    /// so zero-area boxes (a point the model pinned) still match.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_mapping() {
        assert_eq!(DocumentKind::from_mime("application/pdf"), Some(DocumentKind::Pdf));
        assert_eq!(
            DocumentKind::from_mime("IMAGE/PNG"),
            Some(DocumentKind::Image(RasterFormat::Png))
        );
        assert_eq!(
            DocumentKind::from_mime("image/jpeg; q=0.9"),
            Some(DocumentKind::Image(RasterFormat::Jpeg))
        );
        assert_eq!(
            DocumentKind::from_mime("image/x-ms-bmp"),
            Some(DocumentKind::Image(RasterFormat::Bmp))
        );
        assert_eq!(DocumentKind::from_mime("image/svg+xml"), None);
        assert_eq!(DocumentKind::from_mime("text/plain"), None);
        assert_eq!(DocumentKind::from_mime(""), None);
    }

    #[test]
    fn overlapping_boxes() {
        let a = BoundingBox::clamped(0.1, 0.1, 0.3, 0.3);
        let b = BoundingBox::clamped(0.3, 0.3, 0.3, 0.3);
        let c = BoundingBox::clamped(0.7, 0.7, 0.1, 0.1);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn point_inside_box_overlaps() {
        let area = BoundingBox::clamped(0.2, 0.2, 0.4, 0.4);
        let point = BoundingBox::clamped(0.5, 0.5, 0.0, 0.0);
        assert!(area.overlaps(&point));
    }

    #[test]
    fn clamped_stays_in_unit_square() {
        let b = BoundingBox::clamped(0.8, -0.5, 0.9, 2.0);
        assert_eq!(b.x, 0.8);
        assert_eq!(b.y, 0.0);
        assert!((b.right() - 1.0).abs() < 1e-6);
        assert!((b.bottom() - 1.0).abs() < 1e-6);
    }
}
