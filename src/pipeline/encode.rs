//! Image encoding: `DynamicImage` → base64 PNG for the generate request.
//!
//! Ollama's `/api/generate` takes images as bare base64 strings in the
//! `images` array (no data-URI prefix). PNG is lossless, and schematic
//! linework and small designator text survive it where JPEG artefacts would
//! smear them.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page raster as a base64 PNG string.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(b64)
}
