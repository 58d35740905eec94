//! PDF rasterization using pdfium (Google's PDF engine).
//!
//! Pages are rendered at `dpi / 72` scale since PDF user space is 72 points per inch.

use crate::config::{EngineConfig, ResourceLimits};
use crate::error::{Result, ThumbnailError};
use crate::layers::{Frame, FrameBudget};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// PDF renderer bound to a pdfium library instance.
pub struct PdfRenderer {
    pdfium: Pdfium,
}

impl PdfRenderer {
    /// Bind pdfium.
    ///
    /// Tries the configured directory, `PDFIUM_DYNAMIC_LIB_PATH`, `./`,
    /// `/usr/lib`, `/usr/local/lib`, then the system library.
    pub fn bind(config: &EngineConfig) -> Result<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = &config.pdfium_library_path {
            candidates.push(dir.clone());
        }
        if let Ok(dir) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
            candidates.push(PathBuf::from(dir));
        }
        candidates.extend(["./", "/usr/lib", "/usr/local/lib"].map(PathBuf::from));

        let bindings = candidates
            .iter()
            .find_map(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(Pdfium::bind_to_system_library)
            .map_err(|e| {
                ThumbnailError::Pdfium(format!("Failed to load pdfium library: {}", e))
            })?;

        info!("pdfium bound");

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    /// Number of pages in the document.
    pub fn page_count(&self, bytes: &[u8]) -> Result<usize> {
        let document = self.load(bytes)?;
        Ok(document.pages().len() as usize)
    }

    /// Rasterize page `index` (0-based), returning it with the page count.
    pub fn render_page(
        &self,
        bytes: &[u8],
        index: usize,
        dpi: u32,
        limits: &ResourceLimits,
    ) -> Result<(Frame, usize)> {
        let document = self.load(bytes)?;
        let count = document.pages().len() as usize;
        if index >= count {
            return Err(ThumbnailError::FrameOutOfRange { index, count });
        }
        let image = render_one(&document, index, dpi, limits)?;
        Ok((Frame::full(image), count))
    }

    /// Rasterize every page of the document.
    ///
    /// Fails with a `memory` resource error once the rendered pages held
    /// together pass the memory ceiling.
    pub fn render_all(&self, bytes: &[u8], dpi: u32, limits: &ResourceLimits) -> Result<Vec<Frame>> {
        let start = Instant::now();
        let document = self.load(bytes)?;
        let count = document.pages().len() as usize;

        let mut frames = FrameBudget::new(limits);
        for index in 0..count {
            frames.push(Frame::full(render_one(&document, index, dpi, limits)?))?;
        }

        debug!("Rendered {} PDF pages in {:?}", count, start.elapsed());
        Ok(frames.into_frames())
    }

    fn load<'a>(&'a self, bytes: &'a [u8]) -> Result<PdfDocument<'a>> {
        self.pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ThumbnailError::PdfRender(format!("Failed to load PDF: {}", e)))
    }
}

fn render_one(
    document: &PdfDocument,
    index: usize,
    dpi: u32,
    limits: &ResourceLimits,
) -> Result<DynamicImage> {
    let page = document.pages().get(index as u16).map_err(|e| {
        ThumbnailError::PdfRender(format!("Failed to get page {}: {}", index + 1, e))
    })?;

    let (width, height) = pixel_size(page.width().value, page.height().value, dpi);
    limits.check_area(width, height)?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_target_height(height as i32)
        .rotate_if_landscape(PdfPageRenderRotation::None, false);

    let bitmap = page.render_with_config(&render_config).map_err(|e| {
        ThumbnailError::PdfRender(format!("Failed to render page {}: {}", index + 1, e))
    })?;

    Ok(bitmap.as_image())
}

/// Pixel size of a page measured in PDF points, at `dpi`.
pub fn pixel_size(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    (
        ((width_points * scale) as u32).max(1),
        ((height_points * scale) as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_size_us_letter() {
        // At 72 DPI (1:1)
        assert_eq!(pixel_size(612.0, 792.0, 72), (612, 792));
        // Default thumbnail resolution
        assert_eq!(pixel_size(612.0, 792.0, 144), (1224, 1584));
        assert_eq!(pixel_size(612.0, 792.0, 300), (2550, 3300));
    }

    #[test]
    fn test_pixel_size_a4() {
        // A4 paper: 210mm x 297mm = 595.28 x 841.89 points
        let (w, h) = pixel_size(595.28, 841.89, 150);
        assert!(w == 1240 || w == 1239, "Expected ~1240, got {}", w);
        assert!(h == 1753 || h == 1754, "Expected ~1753-1754, got {}", h);
    }

    #[test]
    fn test_pixel_size_never_zero() {
        assert_eq!(pixel_size(612.0, 792.0, 0), (1, 1));
    }

    #[test]
    fn test_default_area_fits_letter_at_default_dpi() {
        let (w, h) = pixel_size(612.0, 792.0, 144);
        assert!(ResourceLimits::default().check_area(w, h).is_ok());
    }

    #[test]
    fn test_bind_or_report_pdfium_error() {
        match PdfRenderer::bind(&EngineConfig::default()) {
            Ok(renderer) => {
                assert!(renderer.page_count(b"not a pdf").is_err());
            }
            Err(ThumbnailError::Pdfium(_)) => {
                // pdfium not installed, skip test
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
