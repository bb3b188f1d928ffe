pub mod capture;
pub mod error;
pub mod pipeline;
pub mod scan;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameMetadata};
pub use error::{DecodeError, Error, SinkError};

/// Environment variable prefix, e.g. `BARSCAN__ADMISSION__INTERVAL_MS=500`
pub const ENV_PREFIX: &str = "BARSCAN";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub admission: AdmissionConfig,
    pub decoder: DecoderConfig,
    pub annotation: AnnotationConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    Gstreamer,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node, empty to auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Camera-native format requested from the device
    pub format: PixelFormat,
    /// Layout delivered to the processing stage by the GStreamer pipeline
    pub output_format: PixelFormat,
    /// Insert a scaling capability filter forcing `width`x`height`
    pub capsfilter: bool,
    /// Tee a preview branch into a video sink
    pub display: bool,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionPolicy {
    Unthrottled,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub policy: AdmissionPolicy,
    pub interval_ms: u64,
}

impl AdmissionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderBackend {
    /// One backend call returns every symbol in the frame
    Multi,
    /// Locate first, then decode each cropped region from a file artifact
    Crop,
    /// First symbol only
    Single,
    /// Data Matrix symbols only
    #[serde(rename = "datamatrix")]
    DataMatrix,
    /// Linear barcodes such as EAN, UPC and Code 128
    Barcode,
    /// QR, Data Matrix and linear barcodes in one pass
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub backend: DecoderBackend,
    /// Where crop artifacts are written while being decoded
    pub scratch_dir: PathBuf,
    /// Quiet zone added around each located region before cropping
    pub crop_margin: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// TrueType font for payload labels; system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
    /// Append-only detection log, disabled when unset
    pub detection_log: Option<PathBuf>,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "gstreamer-pipeline") {
                CaptureBackend::Gstreamer
            } else {
                CaptureBackend::V4l2
            },
            device: "/dev/video0".into(),
            width: 640,
            height: 640,
            fps: 30,
            format: PixelFormat::Mjpeg,
            output_format: PixelFormat::Rgb24,
            capsfilter: false,
            display: false,
            buffer_count: 4,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: AdmissionPolicy::RateLimited,
            interval_ms: 1000,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            backend: DecoderBackend::Multi,
            scratch_dir: std::env::temp_dir().join("barscan"),
            crop_margin: 8,
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 16.0,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("detections"),
            detection_log: Some(PathBuf::from("detections/detections.txt")),
            jpeg_quality: 90,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `BARSCAN__*` environment
    /// variables.
    ///
    /// Without an explicit path, `barscan.toml` in the working directory is
    /// used if it exists.
    pub fn load(path: Option<&Path>) -> error::Result<Self> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name("barscan").required(false),
        };

        let config = ::config::Config::builder()
            .add_source(file)
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}
