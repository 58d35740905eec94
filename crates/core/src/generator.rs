//! Page-to-thumbnail generator.
//!
//! [`ThumbnailGenerator`] holds the per-source configuration and owns an
//! [`ImagingEngine`]. Every render applies the configuration to the engine,
//! reads the requested page and encodes it.
//!
//! For local sources the page count is probed when the generator is built,
//! so [`ThumbnailGenerator::set_page`] can be called before the first render.
//! Remote sources report zero pages until they have been rendered once.

use crate::config::{
    is_valid_output_format, Colorspace, EngineConfig, LayerMethod, OutputFormat, RenderedImage,
};
use crate::engine::ImagingEngine;
use crate::error::{Result, ThumbnailError};
use crate::source::Source;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// Default rasterization resolution in DPI.
pub const DEFAULT_RESOLUTION: u32 = 144;

/// Renders single pages of a document or image into thumbnails.
pub struct ThumbnailGenerator {
    source: Source,
    resolution: u32,
    /// `None` derives the format from the destination path.
    output_format: Option<OutputFormat>,
    page: u32,
    number_of_pages: u32,
    layer_method: LayerMethod,
    colorspace: Option<Colorspace>,
    compression_quality: Option<u8>,
    thumbnail_width: u32,
    thumbnail_height: u32,
    engine: ImagingEngine,
}

impl ThumbnailGenerator {
    /// Create a generator for a local path or URL with default engine limits.
    pub fn new(source: &str) -> Result<Self> {
        Self::with_config(source, EngineConfig::default())
    }

    /// Create a generator with explicit engine configuration.
    pub fn with_config(source: &str, config: EngineConfig) -> Result<Self> {
        let source = Source::parse(source)?;
        let mut engine = ImagingEngine::new(config)?;

        let number_of_pages = match &source {
            Source::Local(path) => match engine.ping(path) {
                Ok(count) => to_page_number(count),
                Err(e) => {
                    warn!("Could not count pages of {}: {}", path.display(), e);
                    0
                }
            },
            Source::Remote(_) => 0,
        };

        debug!("Generator for {} with {} pages", source, number_of_pages);

        Ok(Self {
            source,
            resolution: DEFAULT_RESOLUTION,
            output_format: None,
            page: 1,
            number_of_pages,
            layer_method: LayerMethod::default(),
            colorspace: None,
            compression_quality: None,
            thumbnail_width: 0,
            thumbnail_height: 0,
            engine,
        })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Set the raster resolution in DPI.
    pub fn set_resolution(&mut self, resolution: u32) -> &mut Self {
        self.resolution = resolution;
        self
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Set the output format. Must be one of `jpg`, `jpeg`, `png`.
    pub fn set_output_format(&mut self, output_format: &str) -> Result<&mut Self> {
        let format = output_format.parse::<OutputFormat>()?;
        self.output_format = Some(format);
        Ok(self)
    }

    /// The configured output format, `jpg` when none was set.
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.unwrap_or_default()
    }

    pub fn set_layer_method(&mut self, layer_method: LayerMethod) -> &mut Self {
        self.layer_method = layer_method;
        self
    }

    /// Set the layer method from text: `"none"` or an integer merge code.
    pub fn set_layer_method_str(&mut self, layer_method: &str) -> Result<&mut Self> {
        self.layer_method = layer_method.parse()?;
        Ok(self)
    }

    pub fn layer_method(&self) -> LayerMethod {
        self.layer_method
    }

    /// Set the thumbnail box. `(0, 0)` keeps the native raster size.
    pub fn set_thumbnail_size(&mut self, width: u32, height: u32) -> &mut Self {
        self.thumbnail_width = width;
        self.thumbnail_height = height;
        self
    }

    pub fn thumbnail_size(&self) -> (u32, u32) {
        (self.thumbnail_width, self.thumbnail_height)
    }

    pub fn set_colorspace(&mut self, colorspace: Colorspace) -> &mut Self {
        self.colorspace = Some(colorspace);
        self
    }

    /// Set the compression quality. The engine clamps it to 1-100.
    pub fn set_compression_quality(&mut self, quality: u8) -> &mut Self {
        self.compression_quality = Some(quality);
        self
    }

    /// Select the page to render.
    pub fn set_page(&mut self, page: u32) -> Result<&mut Self> {
        if page > self.number_of_pages || page < 1 {
            return Err(ThumbnailError::PageDoesNotExist(page));
        }
        self.page = page;
        Ok(self)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn is_valid_output_format(&self, output_format: &str) -> bool {
        is_valid_output_format(output_format)
    }

    /// Last known page count, 0 when it has never been resolved.
    pub fn number_of_pages(&self) -> u32 {
        self.number_of_pages
    }

    /// Render the current page. `destination` is only used to resolve the format.
    pub fn render_page(&mut self, destination: &Path) -> Result<RenderedImage> {
        let start = Instant::now();

        self.engine.set_resolution(self.resolution, self.resolution);
        if let Some(colorspace) = self.colorspace {
            self.engine.set_colorspace(colorspace);
        }
        if let Some(quality) = self.compression_quality {
            self.engine.set_compression_quality(quality);
        }

        let index = self.page.saturating_sub(1) as usize;
        let resize = self.thumbnail_width != 0 && self.thumbnail_height != 0;

        match &self.source {
            Source::Local(path) => {
                self.engine.read_page(path, index)?;
                if resize {
                    self.engine
                        .thumbnail(self.thumbnail_width, self.thumbnail_height)?;
                }
            }
            Source::Remote(url) => {
                self.engine.read_remote(url)?;
                self.engine.set_iterator_index(index)?;
                if resize {
                    self.engine.resize_to_width(self.thumbnail_width)?;
                }
            }
        }

        if let Some(mode) = self.layer_method.merge_mode() {
            self.engine.merge_layers(mode)?;
        }

        self.number_of_pages = to_page_number(self.engine.number_of_images());

        let format = self.determine_output_format(destination);
        self.engine.set_format(format);
        let data = self.engine.image_blob()?;
        let (width, height) = self.engine.dimensions().ok_or(ThumbnailError::NoImage)?;

        debug!(
            "Rendered page {} of {} as {} ({}x{}, {} bytes) in {:?}",
            self.page,
            self.source,
            format,
            width,
            height,
            data.len(),
            start.elapsed()
        );

        Ok(RenderedImage {
            page: self.page,
            data,
            width,
            height,
            format,
        })
    }

    /// Render the current page and write it to `destination`.
    ///
    /// A directory destination gets `<page>.<format>` inside it. Returns
    /// `Ok(false)` when only the final write fails.
    pub fn save_image(&mut self, destination: impl AsRef<Path>) -> Result<bool> {
        let mut path = destination.as_ref().to_path_buf();
        if path.is_dir() {
            path = path.join(format!("{}.{}", self.page, self.output_format()));
        }

        let rendered = self.render_page(&path)?;

        match rendered.write_to(&path) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to write {}: {}", path.display(), e);
                Ok(false)
            }
        }
    }

    /// Render the current page and return the encoded bytes.
    pub fn image_blob(&mut self, destination: impl AsRef<Path>) -> Result<Vec<u8>> {
        Ok(self.render_page(destination.as_ref())?.into_bytes())
    }

    /// Save every page as `<directory>/<prefix><page>.<format>`, in page order.
    ///
    /// Stops at the first failing page; files already written are kept.
    pub fn save_all_pages_as_images(
        &mut self,
        directory: impl AsRef<Path>,
        prefix: &str,
    ) -> Result<Vec<PathBuf>> {
        let number_of_pages = self.number_of_pages;
        if number_of_pages == 0 {
            return Ok(Vec::new());
        }

        let directory = directory.as_ref();
        let mut paths = Vec::with_capacity(number_of_pages as usize);
        for page in 1..=number_of_pages {
            self.set_page(page)?;
            let destination =
                directory.join(format!("{}{}.{}", prefix, page, self.output_format()));
            self.render_page(&destination)?.write_to(&destination)?;
            paths.push(destination);
        }

        Ok(paths)
    }

    /// Resolve the encoding for `destination`.
    ///
    /// A configured format wins over the path extension; anything outside
    /// the allowed set falls back to `jpg`.
    pub fn determine_output_format(&self, destination: &Path) -> OutputFormat {
        let candidate = match self.output_format {
            Some(format) => format.extension().to_string(),
            None => destination
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default()
                .to_lowercase(),
        };

        candidate.parse().unwrap_or(OutputFormat::Jpg)
    }

    /// Release the engine's loaded pixels and native bindings.
    pub fn clear(&mut self) -> bool {
        self.engine.clear();
        true
    }
}

fn to_page_number(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
