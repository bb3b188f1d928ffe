use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;

/// Highest `/dev/videoN` index checked during detection
const MAX_DEVICE_INDEX: u32 = 10;

/// A capture device found by probing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Pick the best format a device offers, compressed first
pub fn preferred_format(offered: &[FourCC]) -> Option<PixelFormat> {
    let has = |code: &[u8; 4]| offered.iter().any(|f| *f == FourCC::new(code));

    if has(b"MJPG") {
        Some(PixelFormat::Mjpeg)
    } else if has(b"YUYV") {
        Some(PixelFormat::Yuyv4)
    } else {
        None
    }
}

/// Search `/dev/video*` for the first capture device with a usable format
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..MAX_DEVICE_INDEX {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            // Metadata nodes share the numbering with real cameras
            continue;
        }

        let offered: Vec<FourCC> = dev
            .enum_formats()
            .map(|formats| formats.into_iter().map(|f| f.fourcc).collect())
            .unwrap_or_default();

        if let Some(format) = preferred_format(&offered) {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice { path, format });
        }
    }

    Err(eyre!("No suitable capture device found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_mjpeg_over_yuyv() {
        let offered = [FourCC::new(b"YUYV"), FourCC::new(b"MJPG")];
        assert_eq!(preferred_format(&offered), Some(PixelFormat::Mjpeg));
    }

    #[test]
    fn test_falls_back_to_yuyv() {
        let offered = [FourCC::new(b"H264"), FourCC::new(b"YUYV")];
        assert_eq!(preferred_format(&offered), Some(PixelFormat::Yuyv4));
    }

    #[test]
    fn test_no_usable_format() {
        assert_eq!(preferred_format(&[FourCC::new(b"H264")]), None);
        assert_eq!(preferred_format(&[]), None);
    }
}
