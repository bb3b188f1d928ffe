//! Draws bounding boxes and payload labels onto admitted frames

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::error::{Error, Result};
use crate::pipeline::normalize::to_image;
use crate::pipeline::symbol::{BoundingBox, DecodedSymbol};
use crate::AnnotationConfig;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
/// Vertical gap between a label and the top edge of its box
const LABEL_GAP: i32 = 10;

/// Fonts tried when no font is configured
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
];

pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    /// Annotator that draws boxes only
    pub fn without_labels() -> Self {
        Self {
            font: None,
            scale: PxScale::from(AnnotationConfig::default().font_size),
        }
    }

    pub fn with_font(font: FontVec, size: f32) -> Self {
        Self {
            font: Some(font),
            scale: PxScale::from(size),
        }
    }

    /// Load the configured font, falling back to well-known system fonts.
    ///
    /// A configured font that cannot be loaded is an error; a missing
    /// system font only disables labels.
    pub fn from_config(config: &AnnotationConfig) -> Result<Self> {
        if let Some(path) = &config.font_path {
            let font = load_font(path)?;
            info!(font = %path.display(), "Loaded label font");
            return Ok(Self::with_font(font, config.font_size));
        }

        for candidate in SYSTEM_FONTS {
            match load_font(Path::new(candidate)) {
                Ok(font) => {
                    info!(font = candidate, "Loaded label font");
                    return Ok(Self::with_font(font, config.font_size));
                }
                Err(e) => debug!(error = %e, "Font candidate unavailable"),
            }
        }

        warn!("No label font found, annotations will contain boxes only");
        Ok(Self::without_labels())
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Render `symbols` onto an RGB copy of `frame`, in decode order.
    ///
    /// Returns `None` only for frames that were not normalized.
    pub fn annotate(&self, frame: &Frame, symbols: &[DecodedSymbol]) -> Option<RgbImage> {
        let mut image = to_image(frame)?.to_rgb8();
        for symbol in symbols {
            self.draw_symbol(&mut image, symbol);
        }
        Some(image)
    }

    fn draw_symbol(&self, image: &mut RgbImage, symbol: &DecodedSymbol) {
        let bbox = symbol.bbox;
        if !bbox.is_valid() {
            return;
        }

        for inset in 0..BOX_THICKNESS {
            let (w, h) = (bbox.width() - 2 * inset, bbox.height() - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x_min + inset, bbox.y_min + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        let Some(font) = &self.font else {
            return;
        };
        if symbol.payload.is_empty() {
            return;
        }

        let text = text_size(self.scale, font, &symbol.payload);
        let (x, y) = label_origin(&bbox, text, image.width());
        draw_text_mut(image, BOX_COLOR, x, y, self.scale, font, &symbol.payload);
    }
}

/// Top-left corner of a label above `bbox`, kept inside the frame
fn label_origin(bbox: &BoundingBox, (text_w, text_h): (u32, u32), frame_width: u32) -> (i32, i32) {
    let y = (bbox.y_min - LABEL_GAP - text_h as i32).max(0);
    let x = bbox.x_min.min(frame_width as i32 - text_w as i32).max(0);
    (x, y)
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path).map_err(|e| Error::Font {
        path: PathBuf::from(path),
        reason: e.to_string(),
    })?;
    FontVec::try_from_vec(bytes).map_err(|e| Error::Font {
        path: PathBuf::from(path),
        reason: e.to_string(),
    })
}
