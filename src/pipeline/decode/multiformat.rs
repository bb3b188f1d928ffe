//! Data Matrix and linear barcode backends built on rxing

use rxing::{BarcodeFormat, Exceptions, RXingResult};
use tracing::trace;

use super::SymbolDecoder;
use crate::capture::Frame;
use crate::error::DecodeError;
use crate::pipeline::normalize::to_image;
use crate::pipeline::symbol::{BoundingBox, DecodedSymbol, SymbolKind};

/// Minimum half-height given to linear symbols, whose result points lie on
/// a single scan line
const LINEAR_MIN_HALF_HEIGHT: i32 = 4;

/// Decodes every symbol rxing finds and keeps the configured kinds
pub struct MultiFormatDecoder {
    name: &'static str,
    kinds: &'static [SymbolKind],
}

impl MultiFormatDecoder {
    pub fn data_matrix() -> Self {
        Self {
            name: "datamatrix",
            kinds: &[SymbolKind::DataMatrix],
        }
    }

    /// EAN, UPC, Code 128 and the other symbologies reported as `BARCODE`
    pub fn barcode() -> Self {
        Self {
            name: "barcode",
            kinds: &[SymbolKind::Barcode],
        }
    }

    pub fn any() -> Self {
        Self {
            name: "any",
            kinds: &[SymbolKind::Qr, SymbolKind::DataMatrix, SymbolKind::Barcode],
        }
    }

    pub fn kinds(&self) -> &[SymbolKind] {
        self.kinds
    }

    fn to_symbol(&self, result: &RXingResult) -> Option<Result<DecodedSymbol, DecodeError>> {
        let kind = kind_of(result.getBarcodeFormat());
        if !self.kinds.contains(&kind) {
            trace!(format = ?result.getBarcodeFormat(), "Ignoring symbol of unselected kind");
            return None;
        }

        let corners: Vec<(i32, i32)> = result
            .getPoints()
            .iter()
            .map(|p| (p.x.round() as i32, p.y.round() as i32))
            .collect();
        let Some(bbox) = BoundingBox::from_points(&corners) else {
            return Some(Err(DecodeError::Backend(format!(
                "{:?} symbol without result points",
                result.getBarcodeFormat()
            ))));
        };

        let bbox = if kind == SymbolKind::Barcode {
            thicken_scan_line(bbox)
        } else {
            bbox
        };
        Some(Ok(DecodedSymbol::new(result.getText(), kind, bbox)))
    }
}

impl SymbolDecoder for MultiFormatDecoder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn decode(&self, frame: &Frame) -> Vec<Result<DecodedSymbol, DecodeError>> {
        let Some(gray) = to_image(frame).map(|image| image.to_luma8()) else {
            return Vec::new();
        };
        let (width, height) = gray.dimensions();

        match rxing::helpers::detect_multiple_in_luma(gray.into_raw(), width, height) {
            Ok(results) => results.iter().filter_map(|r| self.to_symbol(r)).collect(),
            Err(Exceptions::NotFoundException(..)) => Vec::new(),
            Err(e) => vec![Err(DecodeError::Backend(e.to_string()))],
        }
    }
}

/// Symbol kind reported for an rxing format
pub fn kind_of(format: &BarcodeFormat) -> SymbolKind {
    match format {
        BarcodeFormat::QR_CODE => SymbolKind::Qr,
        BarcodeFormat::DATA_MATRIX => SymbolKind::DataMatrix,
        _ => SymbolKind::Barcode,
    }
}

/// Give a box that spans one scan line enough height to be drawn
fn thicken_scan_line(bbox: BoundingBox) -> BoundingBox {
    let half = (bbox.width() / 8).max(LINEAR_MIN_HALF_HEIGHT);
    if bbox.height() >= 2 * half {
        return bbox;
    }
    let mid = (bbox.y_min + bbox.y_max) / 2;
    BoundingBox::new(bbox.x_min, mid - half, bbox.x_max, mid + half)
}
