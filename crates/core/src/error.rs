//! Error types for thumbnail generation.

use thiserror::Error;

/// Main error type for the file-to-thumbnail library.
#[derive(Error, Debug)]
pub enum ThumbnailError {
    /// The source is neither a URL nor an existing local path.
    #[error("File `{0}` does not exist")]
    FileDoesNotExist(String),

    /// Requested output format is not one of jpg, jpeg, png.
    #[error("Format {0} is not supported")]
    InvalidFormat(String),

    /// Layer method is neither a known merge code nor "none".
    #[error("LayerMethod must be an integer merge code or none, got `{0}`")]
    InvalidLayerMethod(String),

    /// Requested page lies outside `[1, number_of_pages]`.
    #[error("Page {0} does not exist")]
    PageDoesNotExist(u32),

    /// Image decoding or encoding failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// TIFF decoding failed.
    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    /// GIF decoding failed.
    #[error(transparent)]
    Gif(#[from] gif::DecodingError),

    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Fetching a remote source failed.
    #[error(transparent)]
    Fetch(#[from] reqwest::Error),

    /// Pdfium library error.
    #[error("Pdfium error: {0}")]
    Pdfium(String),

    /// PDF rendering failed.
    #[error("PDF rendering failed: {0}")]
    PdfRender(String),

    /// PNG encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncoding(String),

    /// A resource ceiling of the engine was hit.
    #[error("{resource} limit exceeded: requested {requested}, limit is {limit}")]
    ResourceLimit {
        resource: &'static str,
        limit: u64,
        requested: u64,
    },

    /// Seek past the frames loaded in the engine.
    #[error("Frame index {index} is out of range, {count} frames loaded")]
    FrameOutOfRange { index: usize, count: usize },

    /// An operation needed a loaded image but the engine holds none.
    #[error("No image loaded in the engine")]
    NoImage,

    /// The source bytes are not a format the engine can decode.
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ThumbnailError>;
