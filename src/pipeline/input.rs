//! Input resolution: validate a user-supplied path and decide its type.
//!
//! ## Why check magic bytes?
//!
//! The MIME type comes from the caller (a file dialog, a drag-and-drop
//! handler, a CLI flag) and may simply be wrong. A file declared as a PDF
//! that does not start with `%PDF` is rejected here with a clear error
//! instead of surfacing later as a backend crash. For callers that have no
//! MIME type at all, [`detect_mime`] sniffs one from the file contents.

use crate::document::DocumentKind;
use crate::error::SeleneError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A local file that exists, is readable and matches its declared type.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// The declared type, lowercased and without parameters.
    pub mime: String,
}

/// Validate `path` and map `mime` to a [`DocumentKind`].
///
/// The MIME check runs first so an unsupported type is reported even for a
/// file that would also fail other checks.
pub fn resolve_input(path: &Path, mime: &str) -> Result<ResolvedInput, SeleneError> {
    let path = path.to_path_buf();
    let kind = DocumentKind::from_mime(mime).ok_or_else(|| SeleneError::UnsupportedType {
        path: path.clone(),
        mime: mime.to_string(),
    })?;

    if !path.is_file() {
        return Err(SeleneError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if kind.is_pdf() {
                let mut magic = [0u8; 4];
                let read = f.read(&mut magic).unwrap_or(0);
                if read < 4 || &magic != b"%PDF" {
                    return Err(SeleneError::NotAPdf { path, magic });
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SeleneError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(SeleneError::FileNotFound { path });
        }
    }

    debug!("Resolved {:?} input: {}", kind, path.display());
    let essence = mime.split(';').next().unwrap_or_default().trim();
    Ok(ResolvedInput {
        path,
        kind,
        mime: essence.to_ascii_lowercase(),
    })
}

/// Sniff a MIME type from the file's leading bytes.
///
/// Returns `None` when the file cannot be read or its type is not
/// recognised. The result is not filtered: an SVG or a ZIP is reported as
/// such, and [`resolve_input`] then rejects it as unsupported.
pub fn detect_mime(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.mime_type().to_string()),
        Ok(None) => guess_from_extension(path),
        Err(e) => {
            debug!("Could not sniff {}: {}", path.display(), e);
            None
        }
    }
}

fn guess_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn unsupported_mime_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "board.svg", b"<svg/>");
        let err = resolve_input(&path, "image/svg+xml").unwrap_err();
        assert!(matches!(err, SeleneError::UnsupportedType { .. }));
    }

    #[test]
    fn missing_file_reported() {
        let err = resolve_input(Path::new("/definitely/not/here.pdf"), "application/pdf")
            .unwrap_err();
        assert!(matches!(err, SeleneError::FileNotFound { .. }));
    }

    #[test]
    fn pdf_magic_checked() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "fake.pdf", b"GIF89a....");
        let err = resolve_input(&path, "application/pdf").unwrap_err();
        match err {
            SeleneError::NotAPdf { magic, .. } => assert_eq!(&magic, b"GIF8"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn short_pdf_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "tiny.pdf", b"%P");
        assert!(matches!(
            resolve_input(&path, "application/pdf"),
            Err(SeleneError::NotAPdf { .. })
        ));
    }

    #[test]
    fn valid_pdf_header_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ok.pdf", b"%PDF-1.5\n%%EOF\n");
        let resolved = resolve_input(&path, "Application/PDF; charset=binary").unwrap();
        assert_eq!(resolved.kind, DocumentKind::Pdf);
        assert_eq!(resolved.path, path);
        assert_eq!(resolved.mime, "application/pdf");
    }

    #[test]
    fn detect_png_by_content() {
        let dir = TempDir::new().unwrap();
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let path = write_file(&dir, "no_extension", &png);
        assert_eq!(detect_mime(&path).as_deref(), Some("image/png"));
    }

    #[test]
    fn detect_pdf_by_content() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "schematic.bin", b"%PDF-1.7\n");
        assert_eq!(detect_mime(&path).as_deref(), Some("application/pdf"));
    }

    #[test]
    fn detect_falls_back_to_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "scan.bmp", b"??");
        assert_eq!(detect_mime(&path).as_deref(), Some("image/bmp"));
    }
}
