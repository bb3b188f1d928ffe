//! QR code backends built on rqrr

use std::path::Path;

use image::GrayImage;
use tracing::trace;

use super::crop::{ArtifactDecoder, SymbolLocator};
use super::SymbolDecoder;
use crate::capture::Frame;
use crate::error::DecodeError;
use crate::pipeline::normalize::to_image;
use crate::pipeline::symbol::{BoundingBox, DecodedSymbol, SymbolKind};

/// One detected grid: its enclosing box and the decode result
struct GridResult {
    bbox: BoundingBox,
    content: Result<String, DecodeError>,
}

/// Locate every QR grid in a grayscale image and optionally decode it
fn scan(gray: &GrayImage, decode: bool) -> Vec<GridResult> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        gray.width() as usize,
        gray.height() as usize,
        |x, y| gray.get_pixel(x as u32, y as u32)[0],
    );
    let grids = prepared.detect_grids();
    trace!(count = grids.len(), "QR grids located");

    grids
        .into_iter()
        .filter_map(|grid| {
            let corners: Vec<(i32, i32)> = grid.bounds.iter().map(|p| (p.x, p.y)).collect();
            let bbox = BoundingBox::from_points(&corners)?;
            let content = if decode {
                grid.decode()
                    .map(|(_, content)| content)
                    .map_err(|e| DecodeError::Backend(e.to_string()))
            } else {
                Ok(String::new())
            };
            Some(GridResult { bbox, content })
        })
        .collect()
}

fn luma(frame: &Frame) -> Option<GrayImage> {
    to_image(frame).map(|image| image.to_luma8())
}

/// Decodes every QR code in the frame with one backend pass
pub struct QrMultiDecoder;

impl SymbolDecoder for QrMultiDecoder {
    fn name(&self) -> &'static str {
        "qr-multi"
    }

    fn decode(&self, frame: &Frame) -> Vec<Result<DecodedSymbol, DecodeError>> {
        let Some(gray) = luma(frame) else {
            return Vec::new();
        };

        scan(&gray, true)
            .into_iter()
            .map(|grid| {
                grid.content
                    .map(|payload| DecodedSymbol::new(payload, SymbolKind::Qr, grid.bbox))
            })
            .collect()
    }
}

/// Decodes the first QR code found, wrapped as a one-element list
pub struct QrSingleDecoder;

impl SymbolDecoder for QrSingleDecoder {
    fn name(&self) -> &'static str {
        "qr-single"
    }

    fn decode(&self, frame: &Frame) -> Vec<Result<DecodedSymbol, DecodeError>> {
        let Some(gray) = luma(frame) else {
            return Vec::new();
        };

        scan(&gray, true)
            .into_iter()
            .next()
            .map(|grid| {
                grid.content
                    .map(|payload| DecodedSymbol::new(payload, SymbolKind::Qr, grid.bbox))
            })
            .into_iter()
            .collect()
    }
}

/// Detection pass of the crop flow: boxes only, no payload
pub struct QrLocator;

impl SymbolLocator for QrLocator {
    fn locate(&self, frame: &Frame) -> Vec<BoundingBox> {
        luma(frame)
            .map(|gray| scan(&gray, false).into_iter().map(|g| g.bbox).collect())
            .unwrap_or_default()
    }
}

/// Decodes a single QR code from an image file
pub struct QrArtifactDecoder;

impl ArtifactDecoder for QrArtifactDecoder {
    fn decode_file(&self, path: &Path) -> Result<(String, SymbolKind), DecodeError> {
        let gray = image::open(path)
            .map_err(|source| DecodeError::ArtifactRead {
                path: path.to_path_buf(),
                source,
            })?
            .to_luma8();

        let mut first_error = None;
        for grid in scan(&gray, true) {
            match grid.content {
                Ok(payload) => return Ok((payload, SymbolKind::Qr)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| DecodeError::NoSymbol(path.to_path_buf())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::pipeline::decode::tests::qr_frame;
    use crate::pipeline::decode::CropDecoder;

    fn blank(width: u32, height: u32) -> Frame {
        Frame::packed(
            vec![255u8; (width * height * 3) as usize],
            width,
            height,
            PixelFormat::Rgb24,
            0,
        )
    }

    #[test]
    fn test_blank_frame_has_no_symbols() {
        let frame = blank(64, 48);
        assert!(QrMultiDecoder.decode(&frame).is_empty());
        assert!(QrSingleDecoder.decode(&frame).is_empty());
        assert!(QrLocator.locate(&frame).is_empty());
    }

    #[test]
    fn test_unsupported_layout_yields_nothing() {
        let frame = Frame::packed(vec![0u8; 12], 2, 2, PixelFormat::Bgr24, 0);
        assert!(QrMultiDecoder.decode(&frame).is_empty());
    }

    #[test]
    fn test_artifact_without_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.png");
        GrayImage::from_pixel(40, 40, image::Luma([255])).save(&path).unwrap();

        match QrArtifactDecoder.decode_file(&path) {
            Err(DecodeError::NoSymbol(p)) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    const MODULE: u32 = 4;
    /// Version 1 codes are 21 modules wide
    const SIDE: i32 = 21 * MODULE as i32;

    fn two_codes() -> Frame {
        qr_frame(640, 480, &[("ABC123", 40, 100), ("HELLO", 340, 100)], MODULE)
    }

    fn assert_near(bbox: BoundingBox, x: i32, y: i32) {
        let tol = 2 * MODULE as i32;
        assert!((bbox.x_min - x).abs() <= tol, "x_min of {bbox}");
        assert!((bbox.y_min - y).abs() <= tol, "y_min of {bbox}");
        assert!((bbox.x_max - (x + SIDE)).abs() <= tol, "x_max of {bbox}");
        assert!((bbox.y_max - (y + SIDE)).abs() <= tol, "y_max of {bbox}");
    }

    fn sorted_by_x(results: Vec<Result<DecodedSymbol, DecodeError>>) -> Vec<DecodedSymbol> {
        let mut symbols: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
        symbols.sort_by_key(|s| s.bbox.x_min);
        symbols
    }

    #[test]
    fn test_multi_decodes_every_code() {
        let symbols = sorted_by_x(QrMultiDecoder.decode(&two_codes()));

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].payload, "ABC123");
        assert_eq!(symbols[0].kind, SymbolKind::Qr);
        assert_near(symbols[0].bbox, 40, 100);
        assert_eq!(symbols[1].payload, "HELLO");
        assert_near(symbols[1].bbox, 340, 100);
    }

    #[test]
    fn test_single_returns_one_code() {
        let symbols = sorted_by_x(QrSingleDecoder.decode(&two_codes()));

        assert_eq!(symbols.len(), 1);
        assert!(["ABC123", "HELLO"].contains(&symbols[0].payload.as_str()));
    }

    #[test]
    fn test_locator_finds_boxes_without_payloads() {
        let mut boxes = QrLocator.locate(&two_codes());
        boxes.sort_by_key(|b| b.x_min);

        assert_eq!(boxes.len(), 2);
        assert_near(boxes[0], 40, 100);
        assert_near(boxes[1], 340, 100);
    }

    #[test]
    fn test_crop_flow_decodes_real_codes() {
        let dir = tempfile::tempdir().unwrap();
        for margin in [0, 8] {
            let scratch = dir.path().join(format!("margin_{margin}"));
            let crop = CropDecoder::new(QrLocator, QrArtifactDecoder, &scratch, margin).unwrap();

            let symbols = sorted_by_x(crop.decode(&two_codes()));

            let payloads: Vec<_> = symbols.iter().map(|s| s.payload.as_str()).collect();
            assert_eq!(payloads, ["ABC123", "HELLO"], "margin {margin}");
            // Boxes are the located ones, not the padded crop
            assert_near(symbols[0].bbox, 40, 100);
            assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_artifact_with_code_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code.png");
        let frame = qr_frame(120, 120, &[("ARTIFACT", 16, 16)], MODULE);
        to_image(&frame).unwrap().save(&path).unwrap();

        let (payload, kind) = QrArtifactDecoder.decode_file(&path).unwrap();
        assert_eq!(payload, "ARTIFACT");
        assert_eq!(kind, SymbolKind::Qr);
    }

    #[test]
    fn test_missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = QrArtifactDecoder.decode_file(&dir.path().join("gone.png"));
        assert!(matches!(result, Err(DecodeError::ArtifactRead { .. })));
    }
}
