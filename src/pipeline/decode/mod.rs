//! Barcode decoder adapter
//!
//! Backends implement [`SymbolDecoder`] and report one result per symbol or
//! per located region. [`DecoderAdapter`] logs failed items, clamps boxes to
//! the frame and drops degenerate ones, so the annotator only ever sees
//! valid symbols.

pub mod crop;
pub mod multiformat;
pub mod qr;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::error::{DecodeError, Result};
use crate::pipeline::symbol::DecodedSymbol;
use crate::{DecoderBackend, DecoderConfig};

pub use crop::{ArtifactDecoder, CropDecoder, SymbolLocator};
pub use multiformat::MultiFormatDecoder;
pub use qr::{QrArtifactDecoder, QrLocator, QrMultiDecoder, QrSingleDecoder};

/// A decoding backend.
///
/// Each item is independent: a failure for one symbol must not prevent the
/// others from being returned.
pub trait SymbolDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, frame: &Frame) -> Vec<std::result::Result<DecodedSymbol, DecodeError>>;
}

/// Wraps the configured backend for the frame stage
pub struct DecoderAdapter {
    backend: Box<dyn SymbolDecoder>,
}

impl DecoderAdapter {
    pub fn new(backend: Box<dyn SymbolDecoder>) -> Self {
        Self { backend }
    }

    /// Construct the backend selected in configuration
    pub fn from_config(config: &DecoderConfig) -> Result<Self> {
        let backend: Box<dyn SymbolDecoder> = match config.backend {
            DecoderBackend::Multi => Box::new(QrMultiDecoder),
            DecoderBackend::Single => Box::new(QrSingleDecoder),
            DecoderBackend::DataMatrix => Box::new(MultiFormatDecoder::data_matrix()),
            DecoderBackend::Barcode => Box::new(MultiFormatDecoder::barcode()),
            DecoderBackend::Any => Box::new(MultiFormatDecoder::any()),
            DecoderBackend::Crop => Box::new(CropDecoder::new(
                QrLocator,
                QrArtifactDecoder,
                &config.scratch_dir,
                config.crop_margin,
            )?),
        };
        info!(backend = backend.name(), "Decoder backend ready");
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Decode every symbol in `frame`, in backend order.
    ///
    /// Failed items are logged and skipped; boxes are clamped to the frame
    /// and zero-area results dropped.
    pub fn decode(&self, frame: &Frame, frame_index: u64) -> Vec<DecodedSymbol> {
        let start = Instant::now();
        let results = self.backend.decode(frame);
        metrics::histogram!("decode_time_us").record(start.elapsed().as_micros() as f64);

        let mut symbols = Vec::with_capacity(results.len());
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(mut symbol) => {
                    let clamped = symbol.bbox.clamp_to(frame.width(), frame.height());
                    if !clamped.is_valid() {
                        debug!(
                            frame = frame_index,
                            symbol = idx,
                            bbox = %symbol.bbox,
                            "Dropping symbol with empty bounding box"
                        );
                        continue;
                    }
                    symbol.bbox = clamped;
                    info!(
                        frame = frame_index,
                        symbol = idx,
                        kind = %symbol.kind,
                        bbox = %symbol.bbox,
                        "Decoded {}",
                        symbol.payload
                    );
                    symbols.push(symbol);
                }
                Err(e) => {
                    metrics::counter!("decode_failures_total").increment(1);
                    warn!(frame = frame_index, symbol = idx, error = %e, "Failed to decode symbol");
                }
            }
        }

        if symbols.is_empty() {
            info!(frame = frame_index, "No symbols detected");
        }
        metrics::counter!("symbols_decoded_total").increment(symbols.len() as u64);

        symbols
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::pipeline::symbol::{BoundingBox, SymbolKind};

    /// Backend returning a fixed list of results
    pub(crate) struct Scripted(pub Vec<std::result::Result<DecodedSymbol, String>>);

    impl SymbolDecoder for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn decode(&self, _frame: &Frame) -> Vec<std::result::Result<DecodedSymbol, DecodeError>> {
            self.0
                .iter()
                .cloned()
                .map(|r| r.map_err(DecodeError::Backend))
                .collect()
        }
    }

    /// White RGB frame with a QR code painted at each `(payload, x, y)`,
    /// `module` pixels per module
    pub(crate) fn qr_frame(width: u32, height: u32, codes: &[(&str, u32, u32)], module: u32) -> Frame {
        let mut data = vec![255u8; (width * height * 3) as usize];
        for &(payload, x0, y0) in codes {
            let code = qrcode::QrCode::new(payload).unwrap();
            let size = code.width() as u32;
            let colors = code.to_colors();
            for my in 0..size {
                for mx in 0..size {
                    if colors[(my * size + mx) as usize] != qrcode::Color::Dark {
                        continue;
                    }
                    for y in y0 + my * module..y0 + (my + 1) * module {
                        for x in x0 + mx * module..x0 + (mx + 1) * module {
                            let i = ((y * width + x) * 3) as usize;
                            data[i..i + 3].copy_from_slice(&[0, 0, 0]);
                        }
                    }
                }
            }
        }
        Frame::packed(data, width, height, PixelFormat::Rgb24, 0)
    }

    fn qr(payload: &str, bbox: BoundingBox) -> std::result::Result<DecodedSymbol, String> {
        Ok(DecodedSymbol::new(payload, SymbolKind::Qr, bbox))
    }

    fn frame() -> Frame {
        Frame::packed(vec![255u8; 320 * 240], 320, 240, PixelFormat::Gray8, 0)
    }

    #[test]
    fn test_invalid_boxes_are_dropped() {
        let adapter = DecoderAdapter::new(Box::new(Scripted(vec![
            qr("ok", BoundingBox::new(10, 10, 50, 50)),
            qr("flat", BoundingBox::new(10, 10, 10, 50)),
            qr("inverted", BoundingBox::new(60, 60, 20, 20)),
            qr("outside", BoundingBox::new(400, 10, 500, 50)),
        ])));

        let symbols = adapter.decode(&frame(), 1);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].payload, "ok");
    }

    #[test]
    fn test_boxes_are_clamped_to_frame() {
        let adapter = DecoderAdapter::new(Box::new(Scripted(vec![qr(
            "edge",
            BoundingBox::new(-5, 200, 40, 260),
        )])));

        let symbols = adapter.decode(&frame(), 1);
        assert_eq!(symbols[0].bbox, BoundingBox::new(0, 200, 40, 240));
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let adapter = DecoderAdapter::new(Box::new(Scripted(vec![
            qr("first", BoundingBox::new(0, 0, 10, 10)),
            Err("checksum mismatch".into()),
            qr("third", BoundingBox::new(20, 20, 30, 30)),
        ])));

        let payloads: Vec<_> = adapter
            .decode(&frame(), 1)
            .into_iter()
            .map(|s| s.payload)
            .collect();
        assert_eq!(payloads, vec!["first", "third"]);
    }

    #[test]
    fn test_from_config_selects_backend() {
        let scratch = tempfile::tempdir().unwrap();
        for (backend, name) in [
            (DecoderBackend::Multi, "qr-multi"),
            (DecoderBackend::Single, "qr-single"),
            (DecoderBackend::Crop, "crop"),
            (DecoderBackend::DataMatrix, "datamatrix"),
            (DecoderBackend::Barcode, "barcode"),
            (DecoderBackend::Any, "any"),
        ] {
            let config = DecoderConfig {
                backend,
                scratch_dir: scratch.path().join("crops"),
                crop_margin: 4,
            };
            let adapter = DecoderAdapter::from_config(&config).unwrap();
            assert_eq!(adapter.backend_name(), name);
        }
    }
}
