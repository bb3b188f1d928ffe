//! Persists annotated frames and the detection log
//!
//! Images are named `frame_<index>.jpg` and replaced atomically, so a
//! second write with the same index overwrites the first. The detection log
//! is append-only: persisting the same index twice appends its lines twice.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbImage};
use tracing::debug;

use crate::error::SinkError;
use crate::pipeline::symbol::DecodedSymbol;
use crate::SinkConfig;

pub struct Sink {
    output_dir: PathBuf,
    detection_log: Option<PathBuf>,
    jpeg_quality: u8,
}

impl Sink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            detection_log: None,
            jpeg_quality: SinkConfig::default().jpeg_quality,
        }
    }

    pub fn with_detection_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.detection_log = Some(path.into());
        self
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            detection_log: config.detection_log.clone(),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path the image for `frame_index` is written to
    pub fn frame_path(&self, frame_index: u64) -> PathBuf {
        self.output_dir.join(format!("frame_{frame_index}.jpg"))
    }

    /// Write the annotated frame and append one log line per symbol.
    ///
    /// Both writes are attempted; the first failure is returned.
    pub fn persist(
        &self,
        image: &RgbImage,
        frame_index: u64,
        symbols: &[DecodedSymbol],
    ) -> Result<PathBuf, SinkError> {
        let image_result = self.write_image(image, frame_index);
        let log_result = self.append_records(frame_index, symbols);

        let path = image_result?;
        log_result?;
        Ok(path)
    }

    fn write_image(&self, image: &RgbImage, frame_index: u64) -> Result<PathBuf, SinkError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| SinkError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })?;

        let path = self.frame_path(frame_index);
        let write_err = |source: ImageError| SinkError::WriteImage {
            path: path.clone(),
            source,
        };

        // Encode next to the target, then rename over it
        let staging = tempfile::NamedTempFile::new_in(&self.output_dir)
            .map_err(|e| write_err(ImageError::IoError(e)))?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
                .encode_image(image)
                .map_err(write_err)?;
            writer
                .flush()
                .map_err(|e| write_err(ImageError::IoError(e)))?;
        }
        staging
            .persist(&path)
            .map_err(|e| write_err(ImageError::IoError(e.error)))?;

        debug!(frame = frame_index, path = %path.display(), "Saved annotated frame");
        Ok(path)
    }

    fn append_records(&self, frame_index: u64, symbols: &[DecodedSymbol]) -> Result<(), SinkError> {
        let Some(log) = &self.detection_log else {
            return Ok(());
        };
        if symbols.is_empty() {
            return Ok(());
        }

        let append_err = |source| SinkError::AppendLog {
            path: log.clone(),
            source,
        };

        if let Some(parent) = log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(append_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .map_err(append_err)?;

        // One write per line so concurrent appenders never split a record
        for symbol in symbols {
            let line = format!("{}\n", symbol.record(frame_index));
            file.write_all(line.as_bytes()).map_err(append_err)?;
        }

        Ok(())
    }
}
