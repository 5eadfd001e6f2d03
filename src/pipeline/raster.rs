//! Lazily rendered page images.
//!
//! Rendering every page of a 40-sheet schematic up front costs seconds and
//! hundreds of megabytes, and most callers only need the images for the
//! chunk currently under review (or not at all with `embed_images(false)`).
//! A [`PageRaster`] therefore holds a handle to a [`RasterSource`] and
//! renders on first use, caching the result for any later consumer such as
//! a GUI page preview.

use image::imageops::FilterType;
use image::DynamicImage;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Anything that can produce the image of a page on demand.
///
/// Implementations block; call them from `spawn_blocking`.
pub trait RasterSource: Send + Sync {
    fn render(&self, page_index: usize) -> Result<DynamicImage, String>;
}

/// A raster that is already in memory (image documents).
struct ImageRaster {
    image: Arc<DynamicImage>,
}

impl RasterSource for ImageRaster {
    fn render(&self, _page_index: usize) -> Result<DynamicImage, String> {
        Ok(self.image.as_ref().clone())
    }
}

/// Image of one page, rendered at most once.
pub struct PageRaster {
    page_index: usize,
    source: Arc<dyn RasterSource>,
    cache: OnceLock<Arc<DynamicImage>>,
}

impl PageRaster {
    pub fn new(page_index: usize, source: Arc<dyn RasterSource>) -> Self {
        Self {
            page_index,
            source,
            cache: OnceLock::new(),
        }
    }

    /// A raster whose image is known already.
    pub fn ready(page_index: usize, image: DynamicImage) -> Self {
        let image = Arc::new(image);
        let raster = Self::new(page_index, Arc::new(ImageRaster { image: image.clone() }));
        let _ = raster.cache.set(image);
        raster
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn is_materialized(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Render the page, or return the cached image.
    ///
    /// Blocking. Concurrent first calls may both render; only one result is
    /// kept.
    pub fn materialize(&self) -> Result<Arc<DynamicImage>, String> {
        if let Some(img) = self.cache.get() {
            return Ok(img.clone());
        }
        let img = Arc::new(self.source.render(self.page_index)?);
        debug!(
            "Rendered page {} → {}x{} px",
            self.page_index + 1,
            img.width(),
            img.height()
        );
        Ok(self.cache.get_or_init(|| img).clone())
    }
}

impl fmt::Debug for PageRaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRaster")
            .field("page_index", &self.page_index)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// Shrink `img` to fit within `max_width × max_height`, keeping its aspect
/// ratio. Smaller images are returned unchanged.
pub fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        return img;
    }
    debug!(
        "Downscaling {}x{} to fit {}x{}",
        img.width(),
        img.height(),
        max_width,
        max_height
    );
    img.resize(max_width, max_height, FilterType::Lanczos3)
}

/// Contrast boost for [`enhance_for_review`], in `adjust_contrast` units.
const CONTRAST_BOOST: f32 = 10.0;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;

/// Slight contrast boost and unsharp mask for photographed or scanned
/// sheets, where faint traces and small designators tend to wash out.
pub fn enhance_for_review(img: DynamicImage) -> DynamicImage {
    img.adjust_contrast(CONTRAST_BOOST)
        .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl RasterSource for CountingSource {
        fn render(&self, _page_index: usize) -> Result<DynamicImage, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
        }
    }

    struct BrokenSource;

    impl RasterSource for BrokenSource {
        fn render(&self, page_index: usize) -> Result<DynamicImage, String> {
            Err(format!("page {page_index} is damaged"))
        }
    }

    #[test]
    fn renders_once() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let raster = PageRaster::new(3, source.clone());
        assert!(!raster.is_materialized());
        raster.materialize().unwrap();
        raster.materialize().unwrap();
        assert!(raster.is_materialized());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_error_is_not_cached() {
        let raster = PageRaster::new(1, Arc::new(BrokenSource));
        assert!(raster.materialize().unwrap_err().contains("page 1"));
        assert!(!raster.is_materialized());
    }

    #[test]
    fn ready_raster_is_materialized() {
        let raster = PageRaster::ready(0, DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
        assert!(raster.is_materialized());
        assert_eq!(raster.materialize().unwrap().width(), 2);
    }

    #[test]
    fn fit_within_keeps_aspect() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3840, 1080, Rgb([255, 255, 255])));
        let fitted = fit_within(img, 1920, 1080);
        assert_eq!(fitted.width(), 1920);
        assert_eq!(fitted.height(), 540);
    }

    #[test]
    fn enhancement_spreads_tones_apart() {
        let img = RgbImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgb([100, 100, 100])
            } else {
                Rgb([160, 160, 160])
            }
        });
        let out = enhance_for_review(DynamicImage::ImageRgb8(img)).to_rgb8();
        assert_eq!(out.dimensions(), (16, 16));
        assert!(out.get_pixel(0, 0)[0] < 100);
        assert!(out.get_pixel(15, 15)[0] > 160);
    }

    #[test]
    fn fit_within_leaves_small_images() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        let fitted = fit_within(img, 1920, 1080);
        assert_eq!((fitted.width(), fitted.height()), (640, 480));
    }
}
