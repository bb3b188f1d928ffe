use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp (monotonic)
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Sequence number assigned by the source, counts every delivered buffer
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Interleaved channel count, `None` for packed or compressed formats
    pub fn channels(self) -> Option<u32> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 | PixelFormat::Mjpeg => None,
        }
    }

    /// Format name as used in GStreamer raw video caps
    pub fn caps_name(self) -> Option<&'static str> {
        match self {
            PixelFormat::Gray8 => Some("GRAY8"),
            PixelFormat::Rgb24 => Some("RGB"),
            PixelFormat::Bgr24 => Some("BGR"),
            PixelFormat::Yuyv4 => Some("YUY2"),
            PixelFormat::Mjpeg => None,
        }
    }
}

impl Frame {
    /// Build a tightly packed frame (stride = width * channels)
    pub fn packed(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        let stride = width * format.channels().unwrap_or(1);
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    /// Build a frame whose rows are `stride` bytes apart.
    ///
    /// A stride shorter than one packed row is ignored.
    pub fn with_stride(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        let mut frame = Self::packed(data, width, height, format, sequence);
        if stride > frame.meta.stride {
            Arc::make_mut(&mut frame.meta).stride = stride;
        }
        frame
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Row `y` without stride padding, `None` when the buffer is short
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let channels = self.meta.format.channels()? as usize;
        let start = y as usize * self.meta.stride as usize;
        let end = start + self.meta.width as usize * channels;
        self.data.get(start..end)
    }

    /// True when every row of the frame is backed by the buffer
    pub fn is_complete(&self) -> bool {
        self.meta.height == 0 || self.row(self.meta.height - 1).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_skips_stride_padding() {
        let data: Vec<u8> = vec![
            1, 2, 3, 4, 5, 6, 0, 0, // row 0 + padding
            7, 8, 9, 10, 11, 12, 0, 0, // row 1 + padding
        ];
        let mut frame = Frame::packed(data, 2, 2, PixelFormat::Rgb24, 0);
        Arc::make_mut(&mut frame.meta).stride = 8;

        assert_eq!(frame.row(0), Some(&[1, 2, 3, 4, 5, 6][..]));
        assert_eq!(frame.row(1), Some(&[7, 8, 9, 10, 11, 12][..]));
        assert!(frame.is_complete());
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        // Row 1 of a 2x2 Gray8 frame needs bytes 2..4
        let frame = Frame::packed(vec![0u8; 3], 2, 2, PixelFormat::Gray8, 0);
        assert!(!frame.is_complete());
        assert!(Frame::packed(vec![0u8; 4], 2, 2, PixelFormat::Gray8, 0).is_complete());
    }

    #[test]
    fn test_with_stride_keeps_padding_out_of_rows() {
        let data = vec![1, 2, 0, 0, 3, 4, 0, 0];
        let frame = Frame::with_stride(data, 2, 2, 4, PixelFormat::Gray8, 0);
        assert_eq!(frame.meta.stride, 4);
        assert_eq!(frame.row(1), Some(&[3, 4][..]));

        // Shorter than a packed row falls back to packed
        let frame = Frame::with_stride(vec![0u8; 12], 2, 2, 1, PixelFormat::Rgb24, 0);
        assert_eq!(frame.meta.stride, 6);
    }

    #[test]
    fn test_compressed_formats_have_no_rows() {
        let frame = Frame::packed(vec![0u8; 64], 4, 4, PixelFormat::Mjpeg, 0);
        assert_eq!(frame.row(0), None);
    }
}
