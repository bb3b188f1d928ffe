//! Color normalization ahead of decoding

use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::debug;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};

/// Bring a frame into the layout decoders and the annotator expect.
///
/// BGR is reordered to RGB, RGB and grayscale pass through, and anything
/// that is not a 1 or 3 channel interleaved layout yields `None` so the
/// caller skips the frame. Stride padding is removed from converted frames.
pub fn normalize(frame: Frame) -> Option<Frame> {
    let Some(channels) = frame.format().channels() else {
        debug!(format = ?frame.format(), "Unsupported pixel layout");
        return None;
    };
    if channels != 1 && channels != 3 {
        return None;
    }
    if !frame.is_complete() {
        debug!(
            len = frame.data.len(),
            width = frame.width(),
            height = frame.height(),
            stride = frame.meta.stride,
            "Frame buffer shorter than its dimensions"
        );
        return None;
    }

    match frame.format() {
        PixelFormat::Rgb24 | PixelFormat::Gray8 => Some(frame),
        PixelFormat::Bgr24 => Some(bgr_to_rgb(&frame)),
        PixelFormat::Yuyv4 | PixelFormat::Mjpeg => None,
    }
}

/// Copy a normalized frame into an owned image buffer without stride padding
pub fn to_image(frame: &Frame) -> Option<DynamicImage> {
    let channels = match frame.format() {
        PixelFormat::Gray8 => 1,
        PixelFormat::Rgb24 => 3,
        _ => return None,
    };
    let mut packed = Vec::with_capacity((frame.width() * frame.height() * channels) as usize);
    for y in 0..frame.height() {
        packed.extend_from_slice(frame.row(y)?);
    }

    match frame.format() {
        PixelFormat::Gray8 => {
            GrayImage::from_raw(frame.width(), frame.height(), packed).map(DynamicImage::ImageLuma8)
        }
        _ => RgbImage::from_raw(frame.width(), frame.height(), packed).map(DynamicImage::ImageRgb8),
    }
}

/// Swap B and R into a new, tightly packed buffer
fn bgr_to_rgb(frame: &Frame) -> Frame {
    let width = frame.width() as usize;
    let height = frame.height();
    let mut rgb = Vec::with_capacity(width * height as usize * 3);

    for y in 0..height {
        if let Some(row) = frame.row(y) {
            for px in row.chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
    }

    Frame {
        data: rgb.into(),
        meta: Arc::new(FrameMetadata {
            stride: frame.width() * 3,
            format: PixelFormat::Rgb24,
            ..(*frame.meta).clone()
        }),
        timestamp: frame.timestamp,
    }
}
