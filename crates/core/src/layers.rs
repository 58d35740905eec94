//! Layer compositing.

use crate::config::{MergeMode, ResourceLimits};
use crate::error::Result;
use image::{imageops, DynamicImage, Rgba, RgbaImage};

/// One raster layer positioned on a virtual canvas.
#[derive(Debug, Clone)]
pub struct Layer {
    pub image: DynamicImage,
    pub left: i64,
    pub top: i64,
}

/// A decoded page or animation frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub layer: Layer,
    /// Size of the virtual canvas the layer sits on.
    pub canvas: (u32, u32),
}

impl Frame {
    /// A frame whose single layer fills the whole canvas.
    pub fn full(image: DynamicImage) -> Self {
        let canvas = (image.width(), image.height());
        Self {
            layer: Layer {
                image,
                left: 0,
                top: 0,
            },
            canvas,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.layer.image.width(), self.layer.image.height())
    }

    /// Bytes of decoded pixel data held by the layer.
    pub fn byte_size(&self) -> u64 {
        self.layer.image.as_bytes().len() as u64
    }

    /// Replace the layer image, scaling offsets and canvas by the same factor.
    pub fn replace_scaled(&mut self, image: DynamicImage) {
        let (old_w, old_h) = self.dimensions();
        let sx = image.width() as f64 / old_w.max(1) as f64;
        let sy = image.height() as f64 / old_h.max(1) as f64;

        self.layer.left = (self.layer.left as f64 * sx).round() as i64;
        self.layer.top = (self.layer.top as f64 * sy).round() as i64;
        self.canvas = (
            ((self.canvas.0 as f64 * sx).round() as u32).max(1),
            ((self.canvas.1 as f64 * sy).round() as u32).max(1),
        );
        self.layer.image = image;
    }
}

/// Decoded frames held together, bounded by the memory ceiling.
pub struct FrameBudget<'l> {
    limits: &'l ResourceLimits,
    held: u64,
    frames: Vec<Frame>,
}

impl<'l> FrameBudget<'l> {
    pub fn new(limits: &'l ResourceLimits) -> Self {
        Self {
            limits,
            held: 0,
            frames: Vec::new(),
        }
    }

    /// Keep `frame`, failing if the frames held so far pass the memory ceiling.
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        self.held = self.held.saturating_add(frame.byte_size());
        self.limits.check_memory(self.held)?;
        self.frames.push(frame);
        Ok(())
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Composite `layers` into a single opaque frame.
///
/// Grayscale input stays grayscale when every layer lacks color.
pub fn merge_layers(
    layers: &[Layer],
    canvas: (u32, u32),
    mode: MergeMode,
    background: (u8, u8, u8),
) -> Frame {
    let (origin_x, origin_y, width, height) = merged_bounds(layers, canvas, mode);
    let (r, g, b) = background;
    let mut target = RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([r, g, b, 255]));

    for layer in layers {
        let rgba = layer.image.to_rgba8();
        imageops::overlay(&mut target, &rgba, layer.left - origin_x, layer.top - origin_y);
    }

    let gray = !layers.is_empty() && layers.iter().all(|l| !l.image.color().has_color());
    let merged = if gray {
        DynamicImage::ImageLuma8(DynamicImage::ImageRgba8(target).to_luma8())
    } else {
        DynamicImage::ImageRgba8(target)
    };

    Frame::full(merged)
}

/// Origin and size of the merged canvas.
fn merged_bounds(layers: &[Layer], canvas: (u32, u32), mode: MergeMode) -> (i64, i64, u32, u32) {
    match mode {
        MergeMode::Flatten => (0, 0, canvas.0, canvas.1),
        MergeMode::Mosaic => {
            let (mut right, mut bottom) = (canvas.0 as i64, canvas.1 as i64);
            for layer in layers {
                right = right.max(layer.left + layer.image.width() as i64);
                bottom = bottom.max(layer.top + layer.image.height() as i64);
            }
            (0, 0, right.max(0) as u32, bottom.max(0) as u32)
        }
        MergeMode::Merge => {
            if layers.is_empty() {
                return (0, 0, canvas.0, canvas.1);
            }
            let mut left = i64::MAX;
            let mut top = i64::MAX;
            let mut right = i64::MIN;
            let mut bottom = i64::MIN;
            for layer in layers {
                left = left.min(layer.left);
                top = top.min(layer.top);
                right = right.max(layer.left + layer.image.width() as i64);
                bottom = bottom.max(layer.top + layer.image.height() as i64);
            }
            (left, top, (right - left) as u32, (bottom - top) as u32)
        }
    }
}
