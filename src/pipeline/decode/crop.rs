//! Detect-then-crop-then-decode flow
//!
//! A locator finds candidate regions, each region is cropped to a PNG
//! artifact in the scratch directory and handed to a file based decoder.
//! Artifacts are removed once decoded.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::{debug, warn};

use super::SymbolDecoder;
use crate::capture::Frame;
use crate::error::{DecodeError, Error, Result};
use crate::pipeline::normalize::to_image;
use crate::pipeline::symbol::{BoundingBox, DecodedSymbol, SymbolKind};

/// First pass of the crop flow, yields regions without payloads
pub trait SymbolLocator: Send + Sync {
    fn locate(&self, frame: &Frame) -> Vec<BoundingBox>;
}

/// Decodes a single symbol from an image file
pub trait ArtifactDecoder: Send + Sync {
    fn decode_file(&self, path: &Path) -> std::result::Result<(String, SymbolKind), DecodeError>;
}

pub struct CropDecoder<L, D> {
    locator: L,
    decoder: D,
    scratch_dir: PathBuf,
    margin: u32,
}

impl<L: SymbolLocator, D: ArtifactDecoder> CropDecoder<L, D> {
    /// Creates `scratch_dir` if needed
    pub fn new(locator: L, decoder: D, scratch_dir: &Path, margin: u32) -> Result<Self> {
        fs::create_dir_all(scratch_dir).map_err(|source| Error::Scratch {
            path: scratch_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            locator,
            decoder,
            scratch_dir: scratch_dir.to_path_buf(),
            margin,
        })
    }

    /// Crop one region to an artifact and decode it
    fn decode_region(
        &self,
        image: &image::DynamicImage,
        idx: usize,
        bbox: BoundingBox,
    ) -> std::result::Result<DecodedSymbol, DecodeError> {
        let region = bbox.expand(self.margin).clamp_to(image.width(), image.height());
        if !region.is_valid() {
            return Err(DecodeError::EmptyRegion {
                x_min: bbox.x_min,
                y_min: bbox.y_min,
                x_max: bbox.x_max,
                y_max: bbox.y_max,
            });
        }

        let crop = image.crop_imm(
            region.x_min as u32,
            region.y_min as u32,
            region.width() as u32,
            region.height() as u32,
        );

        let mut artifact = tempfile::Builder::new()
            .prefix(&format!("crop_{idx}_"))
            .suffix(".png")
            .tempfile_in(&self.scratch_dir)
            .map_err(DecodeError::ArtifactCreate)?;
        let path = artifact.path().to_path_buf();

        crop.write_to(artifact.as_file_mut(), ImageFormat::Png)
            .map_err(|source| DecodeError::ArtifactWrite {
                path: path.clone(),
                source,
            })?;
        debug!(artifact = %path.display(), region = %region, "Wrote crop artifact");

        let result = self.decoder.decode_file(&path);

        if let Err(e) = artifact.close() {
            warn!(artifact = %path.display(), error = %e, "Failed to remove crop artifact");
        }

        let (payload, kind) = result?;
        Ok(DecodedSymbol::new(payload, kind, bbox))
    }
}

impl<L: SymbolLocator, D: ArtifactDecoder> SymbolDecoder for CropDecoder<L, D> {
    fn name(&self) -> &'static str {
        "crop"
    }

    fn decode(&self, frame: &Frame) -> Vec<std::result::Result<DecodedSymbol, DecodeError>> {
        let boxes = self.locator.locate(frame);
        if boxes.is_empty() {
            return Vec::new();
        }
        let Some(image) = to_image(frame) else {
            return Vec::new();
        };

        boxes
            .into_iter()
            .enumerate()
            .map(|(idx, bbox)| self.decode_region(&image, idx, bbox))
            .collect()
    }
}
