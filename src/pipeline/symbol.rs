//! Decoded symbol records shared by decoders, the annotator and the sink

use std::fmt;

/// Symbology of a decoded symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Qr,
    /// Any other 1D/2D barcode
    Barcode,
    DataMatrix,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Qr => "QR",
            SymbolKind::Barcode => "BARCODE",
            SymbolKind::DataMatrix => "DATAMATRIX",
        };
        f.write_str(name)
    }
}

/// Axis-aligned box in frame pixel coordinates, origin top-left.
///
/// `x_max` and `y_max` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Smallest box enclosing a polygon
    pub fn from_points(points: &[(i32, i32)]) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        let mut bbox = Self::new(x0, y0, x0, y0);
        for &(x, y) in rest {
            bbox.x_min = bbox.x_min.min(x);
            bbox.y_min = bbox.y_min.min(y);
            bbox.x_max = bbox.x_max.max(x);
            bbox.y_max = bbox.y_max.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// A box with zero or negative area is never drawn or cropped
    pub fn is_valid(&self) -> bool {
        self.x_max > self.x_min && self.y_max > self.y_min
    }

    /// Intersection with a `width`x`height` frame
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            x_min: self.x_min.clamp(0, w),
            y_min: self.y_min.clamp(0, h),
            x_max: self.x_max.clamp(0, w),
            y_max: self.y_max.clamp(0, h),
        }
    }

    /// Grow by `margin` pixels on every side
    pub fn expand(&self, margin: u32) -> Self {
        let m = margin as i32;
        Self {
            x_min: self.x_min.saturating_sub(m),
            y_min: self.y_min.saturating_sub(m),
            x_max: self.x_max.saturating_add(m),
            y_max: self.y_max.saturating_add(m),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}

/// A decoded barcode instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSymbol {
    pub payload: String,
    pub kind: SymbolKind,
    pub bbox: BoundingBox,
}

impl DecodedSymbol {
    pub fn new(payload: impl Into<String>, kind: SymbolKind, bbox: BoundingBox) -> Self {
        Self {
            payload: payload.into(),
            kind,
            bbox,
        }
    }

    /// Detection log line, without the trailing newline
    pub fn record(&self, frame_index: u64) -> String {
        format!(
            "Frame {}: {} (Type: {})",
            frame_index, self.payload, self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_encloses_polygon() {
        let bbox = BoundingBox::from_points(&[(120, 90), (210, 100), (200, 190), (110, 180)]).unwrap();
        assert_eq!(bbox, BoundingBox::new(110, 90, 210, 190));
        assert!(BoundingBox::from_points(&[]).is_none());
    }

    #[test]
    fn test_degenerate_boxes_are_invalid() {
        assert!(BoundingBox::new(0, 0, 1, 1).is_valid());
        assert!(!BoundingBox::new(5, 0, 5, 10).is_valid());
        assert!(!BoundingBox::new(0, 10, 10, 2).is_valid());
    }

    #[test]
    fn test_clamp_to_frame() {
        let bbox = BoundingBox::new(-20, 600, 50, 700).clamp_to(640, 640);
        assert_eq!(bbox, BoundingBox::new(0, 600, 50, 640));

        let outside = BoundingBox::new(700, 10, 800, 20).clamp_to(640, 480);
        assert!(!outside.is_valid());
    }

    #[test]
    fn test_record_format() {
        let symbol = DecodedSymbol::new("ABC123", SymbolKind::Qr, BoundingBox::new(100, 100, 200, 200));
        assert_eq!(symbol.record(1), "Frame 1: ABC123 (Type: QR)");
    }
}
