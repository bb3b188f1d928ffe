//! Conversion of camera-native buffers into decodable frames

use color_eyre::{eyre::eyre, Result};
use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};

/// Turn a raw capture buffer into a frame the processing stage can read.
///
/// MJPEG is decompressed and YUYV converted to RGB; raw RGB, BGR and
/// grayscale buffers pass through untouched. `stride` is the driver's
/// bytes per line and may include padding.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
    stride: u32,
    sequence: u64,
) -> Result<Frame> {
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or_else(|| eyre!("JPEG header missing after decode"))?;
            let format = match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => PixelFormat::Rgb24,
                jpeg_decoder::PixelFormat::L8 => PixelFormat::Gray8,
                other => return Err(eyre!("Unsupported JPEG pixel format: {:?}", other)),
            };
            Ok(Frame::packed(
                pixels,
                info.width as u32,
                info.height as u32,
                format,
                sequence,
            ))
        }
        PixelFormat::Yuyv4 => {
            let row_bytes = (width * 2) as usize;
            let stride = (stride as usize).max(row_bytes);
            let expected = match height {
                0 => 0,
                h => stride * (h as usize - 1) + row_bytes,
            };
            if data.len() < expected {
                return Err(eyre!(
                    "YUYV buffer too short: {} < {}",
                    data.len(),
                    expected
                ));
            }
            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            for y in 0..height as usize {
                let start = y * stride;
                rgb.extend(yuyv_to_rgb(&data[start..start + row_bytes]));
            }
            Ok(Frame::packed(rgb, width, height, PixelFormat::Rgb24, sequence))
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8 => Ok(Frame::with_stride(
            data.to_vec(),
            width,
            height,
            stride,
            format,
            sequence,
        )),
    }
}

/// BT.601 YUYV (4:2:2) to packed RGB
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);

    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32 - 16.0;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            rgb.push((1.164 * c + 1.596 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c - 0.392 * d - 0.813 * e).clamp(0.0, 255.0) as u8);
            rgb.push((1.164 * c + 2.017 * d).clamp(0.0, 255.0) as u8);
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_maps_to_gray() {
        // Neutral chroma: every output pixel has R == G == B
        let data = vec![128, 128, 200, 128];
        let rgb = yuyv_to_rgb(&data);
        assert_eq!(rgb.len(), 6);
        assert_eq!(rgb[0], rgb[1]);
        assert_eq!(rgb[1], rgb[2]);
        assert!(rgb[3] > rgb[0]);
    }

    #[test]
    fn test_raw_rgb_passes_through() {
        let frame = decode_frame(&[1, 2, 3, 4, 5, 6], PixelFormat::Rgb24, 2, 1, 6, 7).unwrap();
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!(frame.meta.sequence, 7);
        assert_eq!(&frame.data[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_short_yuyv_is_rejected() {
        assert!(decode_frame(&[0; 4], PixelFormat::Yuyv4, 4, 4, 8, 0).is_err());
    }

    #[test]
    fn test_padded_gray_rows_are_read_without_padding() {
        // 3 pixels per row, driver pads lines to 4 bytes
        let data = [10, 20, 30, 0, 40, 50, 60, 0];
        let frame = decode_frame(&data, PixelFormat::Gray8, 3, 2, 4, 0).unwrap();

        assert_eq!(frame.meta.stride, 4);
        assert_eq!(frame.row(1), Some(&[40, 50, 60][..]));
        let image = crate::pipeline::normalize::to_image(&frame).unwrap().to_luma8();
        assert_eq!(image.as_raw(), &vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_padded_yuyv_rows_are_skipped() {
        // 2 pixels per row (4 bytes), lines padded to 8 bytes; padding is
        // bright so reading it would show up as a bright pixel
        let data = [
            16, 128, 16, 128, 255, 255, 255, 255, //
            16, 128, 16, 128, 255, 255, 255, 255,
        ];
        let frame = decode_frame(&data, PixelFormat::Yuyv4, 2, 2, 8, 0).unwrap();

        assert_eq!(frame.data.len(), 2 * 2 * 3);
        assert!(frame.data.iter().all(|&v| v == 0));
    }
}
