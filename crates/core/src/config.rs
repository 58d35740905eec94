//! Configuration and value types for thumbnail generation.

use crate::error::{Result, ThumbnailError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output formats a thumbnail can be encoded as.
pub const VALID_OUTPUT_FORMATS: &[&str] = &["jpg", "jpeg", "png"];

/// Check if a format string is an allowed output format.
///
/// The comparison is case-sensitive: `"PNG"` is not valid.
pub fn is_valid_output_format(format: &str) -> bool {
    VALID_OUTPUT_FORMATS.contains(&format)
}

/// Encoding of a rendered thumbnail.
///
/// `Jpg` and `Jpeg` encode identically; they differ only in the
/// extension used when a filename is synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpg,
    Jpeg,
    Png,
}

impl OutputFormat {
    /// File extension, spelled exactly as configured.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }

    pub fn is_jpeg(&self) -> bool {
        matches!(self, OutputFormat::Jpg | OutputFormat::Jpeg)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpg
    }
}

impl FromStr for OutputFormat {
    type Err = ThumbnailError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jpg" => Ok(OutputFormat::Jpg),
            "jpeg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            other => Err(ThumbnailError::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How the layers of a frame are composited into a single raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Composite onto the frame's canvas, filled with the background color.
    Flatten = 1,
    /// Composite onto the union bounding box of all layers.
    Merge = 2,
    /// Composite onto a canvas grown from the origin to cover every layer.
    Mosaic = 3,
}

impl MergeMode {
    pub fn code(&self) -> i64 {
        *self as i64
    }
}

impl TryFrom<i64> for MergeMode {
    type Error = ThumbnailError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            1 => Ok(MergeMode::Flatten),
            2 => Ok(MergeMode::Merge),
            3 => Ok(MergeMode::Mosaic),
            other => Err(ThumbnailError::InvalidLayerMethod(other.to_string())),
        }
    }
}

/// Layer flattening strategy applied after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerMethod {
    /// Leave layers untouched.
    None,
    /// Composite the layers using the given mode.
    Merge(MergeMode),
}

impl LayerMethod {
    /// Build a layer method from an integer merge code.
    pub fn from_code(code: i64) -> Result<Self> {
        MergeMode::try_from(code).map(LayerMethod::Merge)
    }

    pub fn merge_mode(&self) -> Option<MergeMode> {
        match self {
            LayerMethod::None => None,
            LayerMethod::Merge(mode) => Some(*mode),
        }
    }
}

impl Default for LayerMethod {
    fn default() -> Self {
        LayerMethod::Merge(MergeMode::Flatten)
    }
}

impl FromStr for LayerMethod {
    type Err = ThumbnailError;

    /// Accepts `"none"` or an integer merge code such as `"1"`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed == "none" {
            return Ok(LayerMethod::None);
        }
        let code: i64 = trimmed
            .parse()
            .map_err(|_| ThumbnailError::InvalidLayerMethod(s.to_string()))?;
        LayerMethod::from_code(code)
    }
}

/// Colorspace decoded pixels are converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colorspace {
    Srgb,
    Gray,
}

/// Resource ceilings for a single engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Worker threads used for decode, resize and encode work.
    /// Default: 1.
    pub threads: usize,

    /// Maximum pixel count (width * height) of a decoded frame.
    /// Default: 10,000,000.
    pub area: u64,

    /// Maximum bytes a decoder may allocate.
    /// Default: 1,024,000,000.
    pub memory: u64,

    /// Maximum size in bytes of a source held in memory for decoding.
    /// Default: 1,024,000,000.
    pub map: u64,

    /// Maximum bytes spooled to temporary disk for remote sources.
    /// Default: unlimited.
    pub disk: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            threads: 1,
            area: 10_000_000,
            memory: 1_024_000_000,
            map: 1_024_000_000,
            disk: None,
        }
    }
}

impl ResourceLimits {
    /// Set the worker thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the pixel area ceiling.
    pub fn area(mut self, pixels: u64) -> Self {
        self.area = pixels;
        self
    }

    /// Set the decoder allocation ceiling.
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    /// Set the in-memory source size ceiling.
    pub fn map(mut self, bytes: u64) -> Self {
        self.map = bytes;
        self
    }

    /// Cap temporary disk usage. `None` means unlimited.
    pub fn disk(mut self, bytes: Option<u64>) -> Self {
        self.disk = bytes;
        self
    }

    /// Validate the limits.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(ThumbnailError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.area == 0 {
            return Err(ThumbnailError::InvalidConfig(
                "area must be greater than 0".to_string(),
            ));
        }
        if self.memory == 0 || self.map == 0 {
            return Err(ThumbnailError::InvalidConfig(
                "memory and map must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Fail with `ResourceLimit` if a frame of the given size exceeds the area ceiling.
    pub fn check_area(&self, width: u32, height: u32) -> Result<()> {
        let requested = width as u64 * height as u64;
        if requested > self.area {
            return Err(ThumbnailError::ResourceLimit {
                resource: "area",
                limit: self.area,
                requested,
            });
        }
        Ok(())
    }

    /// Fail with `ResourceLimit` if a source of `len` bytes exceeds the map ceiling.
    pub fn check_map(&self, len: u64) -> Result<()> {
        if len > self.map {
            return Err(ThumbnailError::ResourceLimit {
                resource: "map",
                limit: self.map,
                requested: len,
            });
        }
        Ok(())
    }

    /// Fail with `ResourceLimit` once `held` bytes of decoded pixels exceed the memory ceiling.
    pub fn check_memory(&self, held: u64) -> Result<()> {
        if held > self.memory {
            return Err(ThumbnailError::ResourceLimit {
                resource: "memory",
                limit: self.memory,
                requested: held,
            });
        }
        Ok(())
    }

    /// Decoder limits derived from the memory ceiling.
    pub fn decoder_limits(&self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.memory);
        limits
    }
}

/// Configuration for an imaging engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resource ceilings.
    pub limits: ResourceLimits,

    /// Background color used when flattening layers or dropping alpha.
    /// Default: white (255, 255, 255).
    pub background: (u8, u8, u8),

    /// Directory holding the pdfium shared library.
    /// If None, `PDFIUM_DYNAMIC_LIB_PATH` and the usual locations are tried.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            background: (255, 255, 255),
            pdfium_library_path: None,
        }
    }
}

impl EngineConfig {
    /// Create an engine config with the given limits.
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    /// Set the background color.
    pub fn background(mut self, rgb: (u8, u8, u8)) -> Self {
        self.background = rgb;
        self
    }

    /// Set the pdfium library directory.
    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pdfium_library_path = Some(dir.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()
    }
}

/// A rendered and encoded page.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// Page number (1-indexed).
    pub page: u32,

    /// Encoded image data.
    pub data: Vec<u8>,

    /// Image width in pixels.
    pub width: u32,

    /// Image height in pixels.
    pub height: u32,

    /// Encoding of `data`.
    pub format: OutputFormat,
}

impl RenderedImage {
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Write the encoded bytes to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // OutputFormat tests
    #[test]
    fn test_valid_output_formats() {
        for format in ["jpg", "jpeg", "png"] {
            assert!(is_valid_output_format(format), "{} should be valid", format);
        }
    }

    #[test]
    fn test_invalid_output_formats() {
        for format in ["gif", "PNG", "Jpg", "", "tiff", " png", "pdf"] {
            assert!(!is_valid_output_format(format), "{:?} should be invalid", format);
        }
    }

    #[test]
    fn test_output_format_from_str_is_case_sensitive() {
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        match "PNG".parse::<OutputFormat>() {
            Err(ThumbnailError::InvalidFormat(f)) => assert_eq!(f, "PNG"),
            other => panic!("Expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_output_format_extension_keeps_spelling() {
        assert_eq!(OutputFormat::Jpg.extension(), "jpg");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpeg");
        assert_eq!(OutputFormat::Png.to_string(), "png");
        assert!(OutputFormat::Jpeg.is_jpeg());
        assert!(!OutputFormat::Png.is_jpeg());
    }

    #[test]
    fn test_output_format_default_is_jpg() {
        assert_eq!(OutputFormat::default(), OutputFormat::Jpg);
    }

    // LayerMethod tests
    #[test]
    fn test_layer_method_default_is_flatten() {
        assert_eq!(
            LayerMethod::default(),
            LayerMethod::Merge(MergeMode::Flatten)
        );
    }

    #[test]
    fn test_layer_method_from_code() {
        assert_eq!(
            LayerMethod::from_code(3).unwrap(),
            LayerMethod::Merge(MergeMode::Mosaic)
        );
        assert!(matches!(
            LayerMethod::from_code(42),
            Err(ThumbnailError::InvalidLayerMethod(_))
        ));
    }

    #[test]
    fn test_layer_method_parse() {
        assert_eq!("none".parse::<LayerMethod>().unwrap(), LayerMethod::None);
        assert_eq!(
            "2".parse::<LayerMethod>().unwrap(),
            LayerMethod::Merge(MergeMode::Merge)
        );
        for bad in ["flat", "1.5", "", "null"] {
            assert!(
                matches!(
                    bad.parse::<LayerMethod>(),
                    Err(ThumbnailError::InvalidLayerMethod(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_merge_mode_codes() {
        assert_eq!(MergeMode::Flatten.code(), 1);
        assert_eq!(MergeMode::Merge.code(), 2);
        assert_eq!(MergeMode::Mosaic.code(), 3);
        assert_eq!(LayerMethod::None.merge_mode(), None);
    }

    // ResourceLimits tests
    #[test]
    fn test_resource_limits_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.threads, 1);
        assert_eq!(limits.area, 10_000_000);
        assert_eq!(limits.memory, 1_024_000_000);
        assert_eq!(limits.map, 1_024_000_000);
        assert!(limits.disk.is_none());
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_resource_limits_builder_pattern() {
        let limits = ResourceLimits::default()
            .threads(2)
            .area(500)
            .memory(1 << 20)
            .map(1 << 16)
            .disk(Some(1 << 24));

        assert_eq!(limits.threads, 2);
        assert_eq!(limits.area, 500);
        assert_eq!(limits.memory, 1 << 20);
        assert_eq!(limits.map, 1 << 16);
        assert_eq!(limits.disk, Some(1 << 24));
    }

    #[test]
    fn test_resource_limits_validation_zero_threads() {
        let limits = ResourceLimits::default().threads(0);
        assert!(matches!(
            limits.validate(),
            Err(ThumbnailError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resource_limits_validation_zero_area() {
        assert!(ResourceLimits::default().area(0).validate().is_err());
        assert!(ResourceLimits::default().map(0).validate().is_err());
    }

    #[test]
    fn test_resource_limits_check_area() {
        let limits = ResourceLimits::default().area(100);
        assert!(limits.check_area(10, 10).is_ok());
        match limits.check_area(10, 11) {
            Err(ThumbnailError::ResourceLimit {
                resource,
                requested,
                ..
            }) => {
                assert_eq!(resource, "area");
                assert_eq!(requested, 110);
            }
            other => panic!("Expected ResourceLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_resource_limits_check_map() {
        let limits = ResourceLimits::default().map(10);
        assert!(limits.check_map(10).is_ok());
        assert!(limits.check_map(11).is_err());
    }

    #[test]
    fn test_resource_limits_check_memory() {
        let limits = ResourceLimits::default().memory(1_000);
        assert!(limits.check_memory(1_000).is_ok());
        assert!(matches!(
            limits.check_memory(1_001),
            Err(ThumbnailError::ResourceLimit {
                resource: "memory",
                limit: 1_000,
                requested: 1_001,
            })
        ));
    }

    // EngineConfig tests
    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.background, (255, 255, 255));
        assert!(config.pdfium_library_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_validate_propagates() {
        let config = EngineConfig::with_limits(ResourceLimits::default().threads(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_serde_round_trip() {
        let config = EngineConfig::with_limits(ResourceLimits::default().disk(Some(4096)))
            .background((0, 0, 0))
            .pdfium_library_path("/opt/pdfium/lib");
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limits, config.limits);
        assert_eq!(back.background, (0, 0, 0));
        assert_eq!(
            back.pdfium_library_path,
            Some(PathBuf::from("/opt/pdfium/lib"))
        );
    }

    #[test]
    fn test_layer_method_serde_spelling() {
        assert_eq!(
            serde_json::to_string(&LayerMethod::None).unwrap(),
            "\"none\""
        );
        let parsed: LayerMethod = serde_json::from_str("{\"merge\":\"mosaic\"}").unwrap();
        assert_eq!(parsed, LayerMethod::Merge(MergeMode::Mosaic));
    }

    // RenderedImage tests
    #[test]
    fn test_rendered_image_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let rendered = RenderedImage {
            page: 1,
            data: vec![0x89, 0x50, 0x4E, 0x47],
            width: 1,
            height: 1,
            format: OutputFormat::Png,
        };
        rendered.write_to(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), rendered.as_bytes());
        assert_eq!(rendered.format(), OutputFormat::Png);
    }
}
