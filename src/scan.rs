//! One-shot scan of a still image
//!
//! Runs the same decoder and annotator as the live stage, without the
//! admission gate or the detection log.

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tracing::info;

use crate::capture::{Frame, PixelFormat};
use crate::error::Result;
use crate::pipeline::{Annotator, DecodedSymbol, DecoderAdapter};

/// Channel value above which a pixel turns white when enhancing
const ENHANCE_THRESHOLD: u8 = 200;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Where to write the annotated copy, `<stem>_annotated.<ext>` by default
    pub output: Option<PathBuf>,
    /// Binarize before decoding
    pub enhance: bool,
}

#[derive(Debug)]
pub struct ScanReport {
    pub symbols: Vec<DecodedSymbol>,
    pub output: PathBuf,
}

/// Decode every symbol in the image at `path` and save an annotated copy
pub fn scan_image(
    path: &Path,
    decoder: &DecoderAdapter,
    annotator: &Annotator,
    options: &ScanOptions,
) -> Result<ScanReport> {
    let image = image::open(path)?.to_rgb8();
    let (width, height) = image.dimensions();

    // Enhancement only feeds the decoder; boxes go onto the original
    let symbols = if options.enhance {
        let mut enhanced = image.clone();
        enhance(&mut enhanced);
        decoder.decode(&rgb_frame(enhanced), 0)
    } else {
        decoder.decode(&rgb_frame(image.clone()), 0)
    };

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| annotated_path(path));
    let original = rgb_frame(image);
    if let Some(annotated) = annotator.annotate(&original, &symbols) {
        annotated.save(&output)?;
        info!(path = %output.display(), symbols = symbols.len(), width, height, "Saved annotated image");
    }

    Ok(ScanReport { symbols, output })
}

fn rgb_frame(image: RgbImage) -> Frame {
    let (width, height) = image.dimensions();
    Frame::packed(image.into_raw(), width, height, PixelFormat::Rgb24, 0)
}

/// Pixels with every channel at or below the threshold become black,
/// everything else white
pub fn enhance(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        let dark = pixel.0.iter().all(|&c| c <= ENHANCE_THRESHOLD);
        *pixel = if dark { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
    }
}

/// `photo.png` becomes `photo_annotated.png` in the same directory
pub fn annotated_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".into());

    input.with_file_name(format!("{stem}_annotated.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::decode::tests::Scripted;
    use crate::pipeline::{BoundingBox, SymbolKind};

    #[test]
    fn test_enhance_binarizes() {
        let mut image = RgbImage::from_vec(
            3,
            1,
            vec![200, 200, 200, 201, 0, 0, 10, 20, 30],
        )
        .unwrap();
        enhance(&mut image);

        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(1, 0), Rgb([255, 255, 255]));
        assert_eq!(*image.get_pixel(2, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotated_path() {
        assert_eq!(
            annotated_path(Path::new("/tmp/shots/label.png")),
            PathBuf::from("/tmp/shots/label_annotated.png")
        );
        assert_eq!(
            annotated_path(Path::new("noext")),
            PathBuf::from("noext_annotated.png")
        );
    }

    #[test]
    fn test_scan_writes_annotated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.png");
        RgbImage::from_pixel(120, 80, Rgb([255, 255, 255]))
            .save(&input)
            .unwrap();

        let decoder = DecoderAdapter::new(Box::new(Scripted(vec![Ok(DecodedSymbol::new(
            "HELLO",
            SymbolKind::Qr,
            BoundingBox::new(10, 10, 60, 60),
        ))])));

        let report = scan_image(
            &input,
            &decoder,
            &Annotator::without_labels(),
            &ScanOptions::default(),
        )
        .unwrap();

        assert_eq!(report.symbols.len(), 1);
        assert_eq!(report.symbols[0].payload, "HELLO");
        assert_eq!(report.output, dir.path().join("input_annotated.png"));

        let annotated = image::open(&report.output).unwrap().to_rgb8();
        assert_eq!(*annotated.get_pixel(10, 30), Rgb([0, 255, 0]));
        assert_eq!(*annotated.get_pixel(100, 70), Rgb([255, 255, 255]));
    }

    /// Reports a fixed symbol only when handed a binarized frame
    struct NeedsBinarized;

    impl crate::pipeline::SymbolDecoder for NeedsBinarized {
        fn name(&self) -> &'static str {
            "needs-binarized"
        }

        fn decode(&self, frame: &Frame) -> Vec<std::result::Result<DecodedSymbol, crate::DecodeError>> {
            if frame.data.iter().all(|&v| v == 0 || v == 255) {
                vec![Ok(DecodedSymbol::new(
                    "BINARY",
                    SymbolKind::Qr,
                    BoundingBox::new(4, 4, 20, 20),
                ))]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn test_enhance_decodes_binarized_but_draws_on_original() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("gray.png");
        RgbImage::from_pixel(40, 40, Rgb([120, 130, 140]))
            .save(&input)
            .unwrap();
        let decoder = DecoderAdapter::new(Box::new(NeedsBinarized));
        let annotator = Annotator::without_labels();

        let plain = scan_image(&input, &decoder, &annotator, &ScanOptions::default()).unwrap();
        assert!(plain.symbols.is_empty());

        let options = ScanOptions {
            output: Some(dir.path().join("enhanced.png")),
            enhance: true,
        };
        let report = scan_image(&input, &decoder, &annotator, &options).unwrap();
        assert_eq!(report.symbols.len(), 1);

        let annotated = image::open(&report.output).unwrap().to_rgb8();
        assert_eq!(*annotated.get_pixel(4, 10), Rgb([0, 255, 0]));
        // Untouched pixels keep their original colour, not the binarized one
        assert_eq!(*annotated.get_pixel(30, 30), Rgb([120, 130, 140]));
        assert_eq!(*annotated.get_pixel(10, 10), Rgb([120, 130, 140]));
    }

    #[test]
    fn test_scan_missing_input_fails() {
        let decoder = DecoderAdapter::new(Box::new(Scripted(vec![])));
        let result = scan_image(
            Path::new("/nonexistent/input.png"),
            &decoder,
            &Annotator::without_labels(),
            &ScanOptions::default(),
        );
        assert!(result.is_err());
    }
}
