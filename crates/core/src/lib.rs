//! # file-to-thumbnail-core
//!
//! Render one page of a document or image into a JPEG or PNG thumbnail.
//!
//! Supported sources:
//!
//! - **PDF**, rasterized with pdfium at a configurable DPI
//! - **Multi-page TIFF**, one page per image directory
//! - **Animated GIF / PNG / WebP**, one page per frame
//! - Any single-frame format the `image` crate decodes
//! - **Remote URLs** of any of the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use file_to_thumbnail_core::ThumbnailGenerator;
//!
//! fn main() -> file_to_thumbnail_core::Result<()> {
//!     let mut generator = ThumbnailGenerator::new("document.pdf")?;
//!     generator
//!         .set_resolution(150)
//!         .set_thumbnail_size(320, 320)
//!         .set_page(2)?;
//!
//!     generator.save_image("page-2.png")?;
//!     generator.clear();
//!     Ok(())
//! }
//! ```
//!
//! ## All Pages
//!
//! ```rust,no_run
//! use file_to_thumbnail_core::ThumbnailGenerator;
//!
//! fn main() -> file_to_thumbnail_core::Result<()> {
//!     let mut generator = ThumbnailGenerator::new("scan.tiff")?;
//!     generator.set_output_format("png")?;
//!
//!     let paths = generator.save_all_pages_as_images("./thumbs", "scan-")?;
//!     println!("Wrote {} thumbnails", paths.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod generator;
pub mod layers;
pub mod pdf_renderer;
pub mod raster;
pub mod source;

// Re-export main types for convenience
pub use config::{
    is_valid_output_format, Colorspace, EngineConfig, LayerMethod, MergeMode, OutputFormat,
    RenderedImage, ResourceLimits, VALID_OUTPUT_FORMATS,
};
pub use engine::ImagingEngine;
pub use error::{Result, ThumbnailError};
pub use generator::ThumbnailGenerator;
pub use source::Source;

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
