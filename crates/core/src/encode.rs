//! JPEG and PNG encoding of rendered frames.

use crate::config::OutputFormat;
use crate::error::{Result, ThumbnailError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;

/// JPEG quality used when no compression quality is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Encode `image` in `format`.
///
/// `quality` is 1-100, already clamped by the engine. JPEG uses it directly;
/// PNG maps it onto zlib effort.
pub fn encode_image(
    image: &DynamicImage,
    format: OutputFormat,
    quality: Option<u8>,
    background: (u8, u8, u8),
) -> Result<Vec<u8>> {
    if format.is_jpeg() {
        encode_jpeg(image, quality.unwrap_or(DEFAULT_JPEG_QUALITY), background)
    } else {
        encode_png(image, quality)
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8, background: (u8, u8, u8)) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);

    // JPEG has no alpha channel.
    let opaque = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(apply_background(image.to_rgba8(), background))
    } else {
        image.clone()
    };

    if opaque.color().has_color() {
        encoder.encode_image(&opaque.to_rgb8())?;
    } else {
        encoder.encode_image(&opaque.to_luma8())?;
    }

    Ok(buffer.into_inner())
}

fn encode_png(image: &DynamicImage, quality: Option<u8>) -> Result<Vec<u8>> {
    let (color, raw, width, height) = match image {
        DynamicImage::ImageLuma8(img) => (
            png::ColorType::Grayscale,
            img.as_raw().clone(),
            img.width(),
            img.height(),
        ),
        DynamicImage::ImageLumaA8(img) => (
            png::ColorType::GrayscaleAlpha,
            img.as_raw().clone(),
            img.width(),
            img.height(),
        ),
        DynamicImage::ImageRgb8(img) => (
            png::ColorType::Rgb,
            img.as_raw().clone(),
            img.width(),
            img.height(),
        ),
        other => {
            let rgba = other.to_rgba8();
            let (w, h) = rgba.dimensions();
            (png::ColorType::Rgba, rgba.into_raw(), w, h)
        }
    };

    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = png::Encoder::new(&mut buffer, width, height);
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png_compression(quality));

    let mut writer = encoder.write_header().map_err(|e| {
        ThumbnailError::PngEncoding(format!("Failed to write PNG header: {}", e))
    })?;

    writer.write_image_data(&raw).map_err(|e| {
        ThumbnailError::PngEncoding(format!("Failed to write PNG data: {}", e))
    })?;

    drop(writer);

    Ok(buffer.into_inner())
}

fn png_compression(quality: Option<u8>) -> png::Compression {
    match quality {
        None => png::Compression::Fast,
        Some(q) if q < 40 => png::Compression::Fast,
        Some(q) if q < 70 => png::Compression::Default,
        Some(_) => png::Compression::Best,
    }
}

/// Blend transparent pixels onto a solid background.
pub fn apply_background(mut image: RgbaImage, background: (u8, u8, u8)) -> RgbaImage {
    let (r, g, b) = background;

    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as f32 / 255.0;
        if alpha < 1.0 {
            let inv_alpha = 1.0 - alpha;
            pixel[0] = ((pixel[0] as f32 * alpha) + (r as f32 * inv_alpha)) as u8;
            pixel[1] = ((pixel[1] as f32 * alpha) + (g as f32 * inv_alpha)) as u8;
            pixel[2] = ((pixel[2] as f32 * alpha) + (b as f32 * inv_alpha)) as u8;
            pixel[3] = 255;
        }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgba};

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn red(w: u32, h: u32, alpha: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, alpha])))
    }

    #[test]
    fn test_encode_png_magic_bytes() {
        let data = encode_image(&red(10, 10, 255), OutputFormat::Png, None, (255, 255, 255))
            .unwrap();
        assert_eq!(&data[0..8], &PNG_MAGIC);
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_encode_png_keeps_transparency() {
        let data = encode_image(&red(4, 4, 128), OutputFormat::Png, Some(90), (0, 0, 0)).unwrap();
        let decoded = image::load_from_memory(&data).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0)[3], 128);
    }

    #[test]
    fn test_encode_png_grayscale() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([77])));
        let data = encode_image(&gray, OutputFormat::Png, None, (255, 255, 255)).unwrap();
        let decoded = image::load_from_memory(&data).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
    }

    #[test]
    fn test_encode_jpeg_for_both_spellings() {
        for format in [OutputFormat::Jpg, OutputFormat::Jpeg] {
            let data = encode_image(&red(8, 8, 255), format, Some(75), (255, 255, 255)).unwrap();
            assert_eq!(&data[0..2], &[0xFF, 0xD8]);
            assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Jpeg);
        }
    }

    #[test]
    fn test_encode_jpeg_flattens_alpha_onto_background() {
        let data = encode_image(&red(8, 8, 0), OutputFormat::Jpg, Some(100), (255, 255, 255))
            .unwrap();
        let decoded = image::load_from_memory(&data).unwrap().to_rgb8();
        let px = decoded.get_pixel(4, 4);
        assert!(px[0] > 240 && px[1] > 240 && px[2] > 240, "got {:?}", px);
    }

    #[test]
    fn test_lower_jpeg_quality_is_smaller() {
        let mut noisy = RgbaImage::new(64, 64);
        for (x, y, px) in noisy.enumerate_pixels_mut() {
            *px = Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8, 255]);
        }
        let noisy = DynamicImage::ImageRgba8(noisy);
        let low = encode_image(&noisy, OutputFormat::Jpg, Some(10), (0, 0, 0)).unwrap();
        let high = encode_image(&noisy, OutputFormat::Jpg, Some(100), (0, 0, 0)).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_png_compression_mapping() {
        assert!(matches!(png_compression(None), png::Compression::Fast));
        assert!(matches!(png_compression(Some(50)), png::Compression::Default));
        assert!(matches!(png_compression(Some(95)), png::Compression::Best));
    }

    #[test]
    fn test_apply_background_blends() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        let out = apply_background(image, (10, 20, 30));
        assert_eq!(out.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));

        let opaque = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 255]));
        let out = apply_background(opaque, (10, 20, 30));
        assert_eq!(out.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
    }
}
