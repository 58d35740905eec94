//! The imaging engine handle.
//!
//! `ImagingEngine` is a stateful, command-driven wrapper over `image`,
//! `tiff` and pdfium. Callers set options, read a source, transform the
//! selected frame and ask for an encoded blob. All pixel work runs inside a
//! private rayon pool sized by [`ResourceLimits::threads`], so the calling
//! thread plus that pool bound the engine's parallelism. PDF rasterization
//! stays on the calling thread.
//!
//! One engine must not be shared between threads; create one per source.

use crate::config::{Colorspace, EngineConfig, MergeMode, OutputFormat, ResourceLimits};
use crate::encode::encode_image;
use crate::error::{Result, ThumbnailError};
use crate::layers::{merge_layers, Frame, Layer};
use crate::pdf_renderer::PdfRenderer;
use crate::raster::{self, SourceKind};
use crate::source;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Resolution used until `set_resolution` is called.
pub const ENGINE_DEFAULT_DPI: u32 = 72;

/// Owned handle to the imaging engine.
pub struct ImagingEngine {
    config: EngineConfig,
    pool: rayon::ThreadPool,
    /// Bound lazily on the first PDF source, released by `clear`.
    pdf: Option<PdfRenderer>,
    resolution: (u32, u32),
    colorspace: Option<Colorspace>,
    quality: Option<u8>,
    format: Option<OutputFormat>,
    frames: Vec<Frame>,
    index: usize,
    page_count: usize,
}

impl ImagingEngine {
    /// Create a new engine with its own resource ceilings.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.limits.threads)
            .build()
            .map_err(|e| {
                ThumbnailError::InvalidConfig(format!("Failed to create thread pool: {}", e))
            })?;

        info!(
            "Imaging engine initialized with {} threads, area={}, memory={}, map={}, disk={:?}",
            config.limits.threads,
            config.limits.area,
            config.limits.memory,
            config.limits.map,
            config.limits.disk
        );

        Ok(Self {
            config,
            pool,
            pdf: None,
            resolution: (ENGINE_DEFAULT_DPI, ENGINE_DEFAULT_DPI),
            colorspace: None,
            quality: None,
            format: None,
            frames: Vec::new(),
            index: 0,
            page_count: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.config.limits
    }

    /// Set the rasterization resolution in DPI.
    ///
    /// Only the horizontal value drives PDF rasterization; pdfium renders
    /// square pixels.
    pub fn set_resolution(&mut self, x_dpi: u32, y_dpi: u32) {
        self.resolution = (x_dpi, y_dpi);
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Colorspace applied to pages as they are decoded.
    pub fn set_colorspace(&mut self, colorspace: Colorspace) {
        self.colorspace = Some(colorspace);
    }

    /// Compression quality (1-100) used when encoding.
    pub fn set_compression_quality(&mut self, quality: u8) {
        self.quality = Some(quality.clamp(1, 100));
    }

    pub fn compression_quality(&self) -> Option<u8> {
        self.quality
    }

    /// Target encoding for `image_blob`.
    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = Some(format);
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// Page count of a local source, without keeping any pixels.
    pub fn ping(&mut self, path: &Path) -> Result<usize> {
        let bytes = source::read_local(path, self.config.limits.map)?;
        let kind = raster::sniff(&bytes)?;
        let count = match kind {
            SourceKind::Pdf => self.pdf_renderer()?.page_count(&bytes)?,
            _ => {
                let limits = &self.config.limits;
                self.pool.install(|| raster::count_pages(kind, &bytes, limits))?
            }
        };
        debug!("Pinged {}: {} pages", path.display(), count);
        Ok(count)
    }

    /// Decode page `index` (0-based) of a local source, replacing loaded frames.
    pub fn read_page(&mut self, path: &Path, index: usize) -> Result<()> {
        let bytes = source::read_local(path, self.config.limits.map)?;
        let kind = raster::sniff(&bytes)?;
        let (frame, count) = match kind {
            SourceKind::Pdf => {
                let dpi = self.resolution.0;
                let limits = self.config.limits.clone();
                self.pdf_renderer()?.render_page(&bytes, index, dpi, &limits)?
            }
            _ => {
                let limits = &self.config.limits;
                self.pool
                    .install(|| raster::decode_page(kind, &bytes, index, limits))?
            }
        };

        debug!(
            "Read page {} of {} from {} ({:?})",
            index + 1,
            count,
            path.display(),
            kind
        );

        self.frames = vec![self.convert_colorspace(frame)];
        self.index = 0;
        self.page_count = count;
        Ok(())
    }

    /// Fetch and decode every page of a remote source, replacing loaded frames.
    pub fn read_remote(&mut self, url: &Url) -> Result<()> {
        let limits = self.config.limits.clone();
        let bytes = source::fetch_remote(url, limits.disk, limits.map)?;
        let kind = raster::sniff(&bytes)?;
        let frames = match kind {
            SourceKind::Pdf => {
                let dpi = self.resolution.0;
                self.pdf_renderer()?.render_all(&bytes, dpi, &limits)?
            }
            _ => self
                .pool
                .install(|| raster::decode_all(kind, &bytes, &limits))?,
        };

        debug!("Read {} frames from {} ({:?})", frames.len(), url, kind);

        self.page_count = frames.len();
        self.frames = frames
            .into_iter()
            .map(|frame| self.convert_colorspace(frame))
            .collect();
        self.index = 0;
        Ok(())
    }

    /// Number of pages in the last source read.
    pub fn number_of_images(&self) -> usize {
        self.page_count
    }

    /// Select the frame that later commands act on.
    pub fn set_iterator_index(&mut self, index: usize) -> Result<()> {
        if index >= self.frames.len() {
            return Err(ThumbnailError::FrameOutOfRange {
                index,
                count: self.frames.len(),
            });
        }
        self.index = index;
        Ok(())
    }

    pub fn iterator_index(&self) -> usize {
        self.index
    }

    /// Dimensions of the selected frame.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.get(self.index).map(Frame::dimensions)
    }

    /// Fit the selected frame inside `width` x `height`, keeping its aspect ratio.
    pub fn thumbnail(&mut self, width: u32, height: u32) -> Result<()> {
        let pool = &self.pool;
        let frame = self
            .frames
            .get_mut(self.index)
            .ok_or(ThumbnailError::NoImage)?;
        let resized = pool.install(|| frame.layer.image.resize(width, height, FilterType::Lanczos3));
        debug!(
            "Thumbnail {:?} -> {}x{}",
            frame.dimensions(),
            resized.width(),
            resized.height()
        );
        frame.replace_scaled(resized);
        Ok(())
    }

    /// Resize the selected frame to `width`, scaling height proportionally.
    pub fn resize_to_width(&mut self, width: u32) -> Result<()> {
        let pool = &self.pool;
        let frame = self
            .frames
            .get_mut(self.index)
            .ok_or(ThumbnailError::NoImage)?;
        let (old_w, old_h) = frame.dimensions();
        let height = proportional_height(old_w, old_h, width);
        let resized =
            pool.install(|| frame.layer.image.resize_exact(width, height, FilterType::Lanczos3));
        debug!("Resize {}x{} -> {}x{}", old_w, old_h, width, height);
        frame.replace_scaled(resized);
        Ok(())
    }

    /// Composite the selected frame and every frame loaded after it into one
    /// opaque raster on the selected frame's canvas.
    ///
    /// The merged raster replaces all loaded frames and becomes the selection.
    /// A local read loads a single page, so only that page's layer is merged.
    pub fn merge_layers(&mut self, mode: MergeMode) -> Result<()> {
        let canvas = self
            .frames
            .get(self.index)
            .map(|frame| frame.canvas)
            .ok_or(ThumbnailError::NoImage)?;
        let layers: Vec<Layer> = self
            .frames
            .drain(..)
            .skip(self.index)
            .map(|frame| frame.layer)
            .collect();

        let background = self.config.background;
        let merged = self
            .pool
            .install(|| merge_layers(&layers, canvas, mode, background));
        debug!(
            "Merged {} layers with {:?} into {:?}",
            layers.len(),
            mode,
            merged.dimensions()
        );

        self.frames = vec![merged];
        self.index = 0;
        Ok(())
    }

    /// Encode the selected frame in the configured format (jpg if unset).
    pub fn image_blob(&self) -> Result<Vec<u8>> {
        let frame = self.frames.get(self.index).ok_or(ThumbnailError::NoImage)?;
        let format = self.format.unwrap_or_default();
        let quality = self.quality;
        let background = self.config.background;
        self.pool
            .install(|| encode_image(&frame.layer.image, format, quality, background))
    }

    /// Release all loaded pixels and the pdfium binding, and reset options.
    pub fn clear(&mut self) {
        self.frames = Vec::new();
        self.pdf = None;
        self.index = 0;
        self.page_count = 0;
        self.resolution = (ENGINE_DEFAULT_DPI, ENGINE_DEFAULT_DPI);
        self.colorspace = None;
        self.quality = None;
        self.format = None;
        debug!("Engine cleared");
    }

    fn pdf_renderer(&mut self) -> Result<&PdfRenderer> {
        if self.pdf.is_none() {
            self.pdf = Some(PdfRenderer::bind(&self.config)?);
        }
        self.pdf
            .as_ref()
            .ok_or_else(|| ThumbnailError::Pdfium("pdfium binding unavailable".into()))
    }

    fn convert_colorspace(&self, mut frame: Frame) -> Frame {
        let converted = match self.colorspace {
            None => return frame,
            Some(Colorspace::Gray) if frame.layer.image.color().has_alpha() => {
                DynamicImage::ImageLumaA8(frame.layer.image.to_luma_alpha8())
            }
            Some(Colorspace::Gray) => DynamicImage::ImageLuma8(frame.layer.image.to_luma8()),
            Some(Colorspace::Srgb) if frame.layer.image.color().has_alpha() => {
                DynamicImage::ImageRgba8(frame.layer.image.to_rgba8())
            }
            Some(Colorspace::Srgb) => DynamicImage::ImageRgb8(frame.layer.image.to_rgb8()),
        };
        frame.layer.image = converted;
        frame
    }
}

/// Height keeping the aspect ratio of `width` x `height` at `target_width`.
fn proportional_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = height as f64 * target_width as f64 / width.max(1) as f64;
    (scaled.round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Rgba, RgbaImage};
    use std::io::Write;

    fn write_gif(frames: &[(u32, u32, [u8; 4])]) -> tempfile::NamedTempFile {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder
                .encode_frames(frames.iter().map(|(w, h, c)| {
                    image::Frame::new(RgbaImage::from_pixel(*w, *h, Rgba(*c)))
                }))
                .unwrap();
        }
        let mut file = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        file.write_all(&bytes).unwrap();
        file
    }

    fn engine() -> ImagingEngine {
        ImagingEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_engine_rejects_invalid_limits() {
        let config = EngineConfig::with_limits(ResourceLimits::default().threads(0));
        assert!(matches!(
            ImagingEngine::new(config),
            Err(ThumbnailError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ping_counts_pages() {
        let gif = write_gif(&[(4, 4, [255, 0, 0, 255]), (4, 4, [0, 255, 0, 255])]);
        let mut engine = engine();
        assert_eq!(engine.ping(gif.path()).unwrap(), 2);
        assert!(engine.dimensions().is_none());
    }

    #[test]
    fn test_read_page_and_blob() {
        let gif = write_gif(&[(8, 6, [255, 0, 0, 255]), (8, 6, [0, 0, 255, 255])]);
        let mut engine = engine();
        engine.read_page(gif.path(), 1).unwrap();
        assert_eq!(engine.number_of_images(), 2);
        assert_eq!(engine.dimensions(), Some((8, 6)));

        engine.set_format(OutputFormat::Png);
        let blob = engine.image_blob().unwrap();
        let decoded = image::load_from_memory(&blob).unwrap().to_rgba8();
        let px = decoded.get_pixel(0, 0).0;
        assert!(px[2] > 200 && px[0] < 50, "expected blue, got {:?}", px);
    }

    #[test]
    fn test_thumbnail_preserves_aspect_ratio() {
        let gif = write_gif(&[(200, 100, [0, 0, 0, 255])]);
        let mut engine = engine();
        engine.read_page(gif.path(), 0).unwrap();
        engine.thumbnail(50, 50).unwrap();
        assert_eq!(engine.dimensions(), Some((50, 25)));
    }

    #[test]
    fn test_resize_to_width_is_proportional() {
        let gif = write_gif(&[(200, 100, [0, 0, 0, 255])]);
        let mut engine = engine();
        engine.read_page(gif.path(), 0).unwrap();
        engine.resize_to_width(80).unwrap();
        assert_eq!(engine.dimensions(), Some((80, 40)));
    }

    #[test]
    fn test_commands_without_image_fail() {
        let mut engine = engine();
        assert!(matches!(engine.thumbnail(10, 10), Err(ThumbnailError::NoImage)));
        assert!(matches!(
            engine.merge_layers(MergeMode::Flatten),
            Err(ThumbnailError::NoImage)
        ));
        assert!(matches!(engine.image_blob(), Err(ThumbnailError::NoImage)));
        assert!(matches!(
            engine.set_iterator_index(0),
            Err(ThumbnailError::FrameOutOfRange { index: 0, count: 0 })
        ));
    }

    #[test]
    fn test_merge_layers_flattens_alpha() {
        let gif = write_gif(&[(4, 4, [255, 0, 0, 255])]);
        let mut engine = engine();
        engine.read_page(gif.path(), 0).unwrap();
        engine.merge_layers(MergeMode::Flatten).unwrap();
        assert_eq!(engine.dimensions(), Some((4, 4)));
        engine.set_format(OutputFormat::Png);
        let decoded = image::load_from_memory(&engine.image_blob().unwrap()).unwrap();
        assert!(decoded.to_rgba8().pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_merge_layers_starts_at_selected_frame() {
        let layer = |w, h, left, top| Frame {
            layer: Layer {
                image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]))),
                left,
                top,
            },
            canvas: (10, 10),
        };
        let mut engine = engine();
        engine.frames = vec![layer(10, 10, 0, 0), layer(2, 2, 3, 3), layer(2, 2, 6, 5)];
        engine.page_count = 3;
        engine.set_iterator_index(1).unwrap();

        engine.merge_layers(MergeMode::Merge).unwrap();
        assert_eq!(engine.dimensions(), Some((5, 4)));
        assert_eq!(engine.frames.len(), 1);
        assert_eq!(engine.iterator_index(), 0);
        assert_eq!(engine.number_of_images(), 3);
    }

    #[test]
    fn test_gray_colorspace_applies_on_read() {
        let gif = write_gif(&[(4, 4, [255, 0, 0, 255])]);
        let mut engine = engine();
        engine.set_colorspace(Colorspace::Gray);
        engine.read_page(gif.path(), 0).unwrap();
        engine.set_format(OutputFormat::Png);
        let decoded = image::load_from_memory(&engine.image_blob().unwrap()).unwrap();
        assert!(!decoded.color().has_color());
    }

    #[test]
    fn test_clear_releases_frames_and_options() {
        let gif = write_gif(&[(4, 4, [255, 0, 0, 255])]);
        let mut engine = engine();
        engine.set_resolution(300, 300);
        engine.set_compression_quality(150);
        assert_eq!(engine.compression_quality(), Some(100));
        engine.read_page(gif.path(), 0).unwrap();

        engine.clear();
        assert!(engine.dimensions().is_none());
        assert_eq!(engine.number_of_images(), 0);
        assert_eq!(engine.resolution(), (ENGINE_DEFAULT_DPI, ENGINE_DEFAULT_DPI));
        assert!(engine.compression_quality().is_none());

        // The handle stays usable after a clear.
        engine.read_page(gif.path(), 0).unwrap();
        assert_eq!(engine.dimensions(), Some((4, 4)));
    }

    #[test]
    fn test_map_limit_applies_to_reads() {
        let gif = write_gif(&[(4, 4, [255, 0, 0, 255])]);
        let config = EngineConfig::with_limits(ResourceLimits::default().map(8));
        let mut engine = ImagingEngine::new(config).unwrap();
        assert!(matches!(
            engine.read_page(gif.path(), 0),
            Err(ThumbnailError::ResourceLimit { resource: "map", .. })
        ));
    }

    #[test]
    fn test_proportional_height() {
        assert_eq!(proportional_height(200, 100, 80), 40);
        assert_eq!(proportional_height(3, 1, 1), 1);
        assert_eq!(proportional_height(1000, 1, 10), 1);
    }
}
