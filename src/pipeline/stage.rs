//! Frame-rate gated detection and annotation stage
//!
//! Called once per upstream frame notification, on whatever thread the
//! source delivers from. All work runs to completion before returning.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::capture::Frame;
use crate::error::Result;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::decode::DecoderAdapter;
use crate::pipeline::gate::AdmissionGate;
use crate::pipeline::normalize::normalize;
use crate::pipeline::sink::Sink;
use crate::Config;

/// Status handed back to the frame source after every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Continue,
}

/// What happened to one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// No frame could be obtained, no state changed
    Unavailable,
    /// Rejected by the admission gate
    Throttled,
    /// Admitted but the pixel layout could not be normalized
    Skipped { index: u64 },
    Processed {
        index: u64,
        symbols: usize,
        /// `None` when persisting failed
        path: Option<PathBuf>,
    },
}

pub struct FrameStage {
    gate: AdmissionGate,
    decoder: DecoderAdapter,
    annotator: Annotator,
    sink: Sink,
}

impl FrameStage {
    pub fn new(gate: AdmissionGate, decoder: DecoderAdapter, annotator: Annotator, sink: Sink) -> Self {
        Self {
            gate,
            decoder,
            annotator,
            sink,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            AdmissionGate::from_config(&config.admission),
            DecoderAdapter::from_config(&config.decoder)?,
            Annotator::from_config(&config.annotation)?,
            Sink::from_config(&config.sink),
        ))
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    /// Frame source callback entry point
    pub fn on_frame(&self, frame: Option<Frame>) -> FlowStatus {
        self.process(frame, Instant::now());
        FlowStatus::Continue
    }

    /// Run one notification through gate, normalizer, decoder, annotator
    /// and sink.
    pub fn process(&self, frame: Option<Frame>, now: Instant) -> StageOutcome {
        let Some(frame) = frame else {
            debug!("No frame available this cycle");
            return StageOutcome::Unavailable;
        };

        let Some(index) = self.gate.admit(now) else {
            metrics::counter!("frames_throttled_total").increment(1);
            return StageOutcome::Throttled;
        };
        metrics::counter!("frames_admitted_total").increment(1);

        let sequence = frame.meta.sequence;
        debug!(
            frame = index,
            sequence,
            width = frame.width(),
            height = frame.height(),
            format = ?frame.format(),
            "Frame admitted"
        );

        let Some(frame) = normalize(frame) else {
            warn!(frame = index, sequence, "Unsupported pixel layout, skipping frame");
            return StageOutcome::Skipped { index };
        };

        let symbols = self.decoder.decode(&frame, index);

        let Some(image) = self.annotator.annotate(&frame, &symbols) else {
            warn!(frame = index, "Normalized frame could not be rendered");
            return StageOutcome::Skipped { index };
        };

        let path = match self.sink.persist(&image, index, &symbols) {
            Ok(path) => Some(path),
            Err(e) => {
                metrics::counter!("persist_failures_total").increment(1);
                error!(frame = index, error = %e, "Failed to persist frame");
                None
            }
        };

        StageOutcome::Processed {
            index,
            symbols: symbols.len(),
            path,
        }
    }
}
