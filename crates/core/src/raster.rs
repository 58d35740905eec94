//! Raster source sniffing and decoding.
//!
//! Multi-page TIFFs are walked IFD by IFD with the `tiff` crate. GIF frames
//! are read raw with the `gif` crate, each one a layer at its own offset on
//! the logical screen. APNG and animated WebP go through `image`'s animation
//! decoders, and every other format `image` recognises is a single page.
//!
//! Decoding every page keeps a running total of the pixel bytes held and
//! fails once it passes the `memory` ceiling.

use crate::config::ResourceLimits;
use crate::error::{Result, ThumbnailError};
use crate::layers::{Frame, FrameBudget, Layer};
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, ImageDecoder,
    ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use std::io::Cursor;
use std::num::NonZeroU64;
use tiff::decoder::{Decoder as TiffDecoder, DecodingResult};
use tiff::ColorType as TiffColor;

/// Kind of source, decided from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Tiff,
    Gif,
    Png,
    WebP,
    Still(ImageFormat),
}

/// Decide how to decode `bytes`.
pub fn sniff(bytes: &[u8]) -> Result<SourceKind> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(SourceKind::Pdf);
    }
    let format = image::guess_format(bytes)
        .map_err(|_| ThumbnailError::UnsupportedSource("unrecognised file signature".into()))?;
    Ok(match format {
        ImageFormat::Tiff => SourceKind::Tiff,
        ImageFormat::Gif => SourceKind::Gif,
        ImageFormat::Png => SourceKind::Png,
        ImageFormat::WebP => SourceKind::WebP,
        other => SourceKind::Still(other),
    })
}

/// Decode page `index` of a raster source, returning it with the page count.
pub fn decode_page(
    kind: SourceKind,
    bytes: &[u8],
    index: usize,
    limits: &ResourceLimits,
) -> Result<(Frame, usize)> {
    match kind {
        SourceKind::Tiff => tiff_page(bytes, index, limits),
        SourceKind::Gif | SourceKind::Png | SourceKind::WebP => {
            let mut selected = None;
            let mut count = 0;
            for frame in frame_iter(kind, bytes, limits)? {
                let frame = frame?;
                if count == index {
                    selected = Some(frame);
                }
                count += 1;
            }
            selected
                .map(|frame| (frame, count))
                .ok_or(ThumbnailError::FrameOutOfRange { index, count })
        }
        SourceKind::Still(format) => {
            if index != 0 {
                return Err(ThumbnailError::FrameOutOfRange { index, count: 1 });
            }
            Ok((Frame::full(still_image(bytes, format, limits)?), 1))
        }
        SourceKind::Pdf => Err(ThumbnailError::UnsupportedSource(
            "PDF sources are rasterized by pdfium".into(),
        )),
    }
}

/// Decode every page of a raster source.
pub fn decode_all(kind: SourceKind, bytes: &[u8], limits: &ResourceLimits) -> Result<Vec<Frame>> {
    match kind {
        SourceKind::Tiff => {
            let mut decoder = tiff_decoder(bytes, limits)?;
            let mut frames = FrameBudget::new(limits);
            frames.push(tiff_read_current(&mut decoder, limits)?)?;
            while decoder.more_images() {
                decoder.next_image()?;
                frames.push(tiff_read_current(&mut decoder, limits)?)?;
            }
            Ok(frames.into_frames())
        }
        SourceKind::Gif | SourceKind::Png | SourceKind::WebP => {
            let mut frames = FrameBudget::new(limits);
            for frame in frame_iter(kind, bytes, limits)? {
                frames.push(frame?)?;
            }
            Ok(frames.into_frames())
        }
        SourceKind::Still(format) => Ok(vec![Frame::full(still_image(bytes, format, limits)?)]),
        SourceKind::Pdf => Err(ThumbnailError::UnsupportedSource(
            "PDF sources are rasterized by pdfium".into(),
        )),
    }
}

/// Count the pages of a raster source.
pub fn count_pages(kind: SourceKind, bytes: &[u8], limits: &ResourceLimits) -> Result<usize> {
    match kind {
        SourceKind::Tiff => {
            let mut decoder = tiff_decoder(bytes, limits)?;
            let mut count = 1;
            while decoder.more_images() {
                decoder.next_image()?;
                count += 1;
            }
            Ok(count)
        }
        SourceKind::Gif => gif_count(bytes, limits),
        SourceKind::Png | SourceKind::WebP => {
            let mut count = 0;
            for frame in animation_frames(kind, bytes, limits)? {
                frame?;
                count += 1;
            }
            Ok(count)
        }
        SourceKind::Still(_) => Ok(1),
        SourceKind::Pdf => Err(ThumbnailError::UnsupportedSource(
            "PDF sources are counted by pdfium".into(),
        )),
    }
}

type FrameIter<'a> = Box<dyn Iterator<Item = Result<Frame>> + 'a>;

fn frame_iter<'a>(kind: SourceKind, bytes: &'a [u8], limits: &ResourceLimits) -> Result<FrameIter<'a>> {
    match kind {
        SourceKind::Gif => gif_frames(bytes, limits),
        _ => animation_frames(kind, bytes, limits),
    }
}

/// Raw GIF frames on the logical screen, not coalesced.
fn gif_frames<'a>(bytes: &'a [u8], limits: &ResourceLimits) -> Result<FrameIter<'a>> {
    let mut decoder = gif_options(limits).read_info(Cursor::new(bytes))?;
    let canvas = (u32::from(decoder.width()), u32::from(decoder.height()));
    limits.check_area(canvas.0, canvas.1)?;

    let limits = limits.clone();
    let mut failed = false;
    Ok(Box::new(std::iter::from_fn(move || {
        if failed {
            return None;
        }
        let next = next_gif_frame(&mut decoder, canvas, &limits).transpose();
        failed = matches!(next, Some(Err(_)));
        next
    })))
}

fn gif_options(limits: &ResourceLimits) -> gif::DecodeOptions {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    options.set_memory_limit(
        NonZeroU64::new(limits.memory).map_or(gif::MemoryLimit::Unlimited, gif::MemoryLimit::Bytes),
    );
    options
}

fn next_gif_frame(
    decoder: &mut gif::Decoder<Cursor<&[u8]>>,
    canvas: (u32, u32),
    limits: &ResourceLimits,
) -> Result<Option<Frame>> {
    let (left, top, width, height) = match decoder.next_frame_info()? {
        Some(info) => (
            i64::from(info.left),
            i64::from(info.top),
            u32::from(info.width),
            u32::from(info.height),
        ),
        None => return Ok(None),
    };
    limits.check_area(width, height)?;

    let mut buffer = vec![0; decoder.buffer_size()];
    decoder.read_into_buffer(&mut buffer)?;
    let image = RgbaImage::from_raw(width, height, buffer)
        .ok_or_else(|| ThumbnailError::UnsupportedSource("truncated GIF frame".into()))?;

    Ok(Some(Frame {
        layer: Layer {
            image: DynamicImage::ImageRgba8(image),
            left,
            top,
        },
        canvas,
    }))
}

/// Count GIF frames without decompressing their pixels.
fn gif_count(bytes: &[u8], limits: &ResourceLimits) -> Result<usize> {
    let mut options = gif_options(limits);
    options.skip_frame_decoding(true);
    let mut decoder = options.read_info(Cursor::new(bytes))?;
    limits.check_area(u32::from(decoder.width()), u32::from(decoder.height()))?;

    let mut count = 0;
    while let Some(frame) = decoder.read_next_frame()? {
        limits.check_area(u32::from(frame.width), u32::from(frame.height))?;
        count += 1;
    }
    Ok(count)
}

/// Frames of PNG / WebP sources. Non-animated PNG and WebP yield one frame.
fn animation_frames<'a>(
    kind: SourceKind,
    bytes: &'a [u8],
    limits: &ResourceLimits,
) -> Result<FrameIter<'a>> {
    let frames = match kind {
        SourceKind::Png => {
            let mut decoder = PngDecoder::new(Cursor::new(bytes))?;
            check_decoder(&mut decoder, limits)?;
            if !decoder.is_apng()? {
                let image = DynamicImage::from_decoder(decoder)?;
                return Ok(Box::new(std::iter::once(Ok(Frame::full(image)))));
            }
            decoder.apng()?.into_frames()
        }
        SourceKind::WebP => {
            let mut decoder = WebPDecoder::new(Cursor::new(bytes))?;
            check_decoder(&mut decoder, limits)?;
            if !decoder.has_animation() {
                let image = DynamicImage::from_decoder(decoder)?;
                return Ok(Box::new(std::iter::once(Ok(Frame::full(image)))));
            }
            decoder.into_frames()
        }
        _ => {
            return Err(ThumbnailError::UnsupportedSource(format!(
                "{:?} is not an animation format",
                kind
            )))
        }
    };

    Ok(Box::new(frames.map(|frame| {
        let frame = frame?;
        let left = frame.left() as i64;
        let top = frame.top() as i64;
        let buffer = frame.into_buffer();
        let canvas = (buffer.width(), buffer.height());
        Ok(Frame {
            layer: Layer {
                image: DynamicImage::ImageRgba8(buffer),
                left,
                top,
            },
            canvas,
        })
    })))
}

/// Apply decoder limits and the area ceiling before any pixels are decoded.
fn check_decoder(decoder: &mut impl ImageDecoder, limits: &ResourceLimits) -> Result<()> {
    decoder.set_limits(limits.decoder_limits())?;
    let (width, height) = decoder.dimensions();
    limits.check_area(width, height)
}

fn still_image(bytes: &[u8], format: ImageFormat, limits: &ResourceLimits) -> Result<DynamicImage> {
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    limits.check_area(width, height)?;

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(limits.decoder_limits());
    Ok(reader.decode()?)
}

fn tiff_decoder<'a>(bytes: &'a [u8], limits: &ResourceLimits) -> Result<TiffDecoder<Cursor<&'a [u8]>>> {
    let mut tiff_limits = tiff::decoder::Limits::default();
    let budget = usize::try_from(limits.memory).unwrap_or(usize::MAX);
    tiff_limits.decoding_buffer_size = budget;
    tiff_limits.intermediate_buffer_size = budget;
    Ok(TiffDecoder::new(Cursor::new(bytes))?.with_limits(tiff_limits))
}

fn tiff_page(bytes: &[u8], index: usize, limits: &ResourceLimits) -> Result<(Frame, usize)> {
    let mut decoder = tiff_decoder(bytes, limits)?;
    let mut selected = None;
    let mut current = 0;
    loop {
        if current == index {
            selected = Some(tiff_read_current(&mut decoder, limits)?);
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
        current += 1;
    }
    let count = current + 1;
    selected
        .map(|frame| (frame, count))
        .ok_or(ThumbnailError::FrameOutOfRange { index, count })
}

fn tiff_read_current(
    decoder: &mut TiffDecoder<Cursor<&[u8]>>,
    limits: &ResourceLimits,
) -> Result<Frame> {
    let (width, height) = decoder.dimensions()?;
    limits.check_area(width, height)?;
    let color = decoder.colortype()?;
    let image = match (decoder.read_image()?, color) {
        (DecodingResult::U8(buf), TiffColor::Gray(8)) => {
            GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
        }
        (DecodingResult::U8(buf), TiffColor::GrayA(8)) => {
            GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
        }
        (DecodingResult::U8(buf), TiffColor::RGB(8)) => {
            RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8)
        }
        (DecodingResult::U8(buf), TiffColor::RGBA(8)) => {
            RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
        }
        (DecodingResult::U8(buf), TiffColor::CMYK(8)) => {
            RgbImage::from_raw(width, height, cmyk_to_rgb(&buf)).map(DynamicImage::ImageRgb8)
        }
        (DecodingResult::U16(buf), TiffColor::Gray(16)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLuma16)
        }
        (DecodingResult::U16(buf), TiffColor::RGB(16)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgb16)
        }
        (DecodingResult::U16(buf), TiffColor::RGBA(16)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgba16)
        }
        (_, other) => {
            return Err(ThumbnailError::UnsupportedSource(format!(
                "TIFF color type {:?}",
                other
            )))
        }
    };
    image
        .map(Frame::full)
        .ok_or_else(|| ThumbnailError::UnsupportedSource("truncated TIFF strip data".into()))
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - px[3] as u32;
            [
                ((255 - px[0] as u32) * k / 255) as u8,
                ((255 - px[1] as u32) * k / 255) as u8,
                ((255 - px[2] as u32) * k / 255) as u8,
            ]
        })
        .collect()
}
