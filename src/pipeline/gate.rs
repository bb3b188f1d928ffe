//! Frame admission gate
//!
//! Decides which upstream frames undergo decoding and owns the processed
//! frame counter. Timestamp and counter live behind one lock so that
//! admission and numbering stay consistent when the streaming framework
//! delivers callbacks from several threads.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{AdmissionConfig, AdmissionPolicy};

/// Admission strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Every frame is admitted
    Unthrottled,
    /// At most one frame per `interval`
    RateLimited { interval: Duration },
}

#[derive(Debug, Default)]
struct GateState {
    last_admitted: Option<Instant>,
    frames_admitted: u64,
}

/// Throttles frames and numbers the admitted ones from 1.
#[derive(Debug)]
pub struct AdmissionGate {
    mode: AdmissionMode,
    state: Mutex<GateState>,
}

impl AdmissionGate {
    pub fn new(mode: AdmissionMode) -> Self {
        Self {
            mode,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn unthrottled() -> Self {
        Self::new(AdmissionMode::Unthrottled)
    }

    pub fn rate_limited(interval: Duration) -> Self {
        Self::new(AdmissionMode::RateLimited { interval })
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        match config.policy {
            AdmissionPolicy::Unthrottled => Self::unthrottled(),
            AdmissionPolicy::RateLimited => Self::rate_limited(config.interval()),
        }
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// Try to admit a frame observed at `now`.
    ///
    /// Returns the frame index (1-based) when admitted. A `now` earlier than
    /// the last admission counts as zero elapsed time.
    pub fn admit(&self, now: Instant) -> Option<u64> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let AdmissionMode::RateLimited { interval } = self.mode {
            if let Some(last) = state.last_admitted {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < interval {
                    trace!(elapsed_ms = elapsed.as_millis() as u64, "Frame throttled");
                    return None;
                }
            }
        }

        state.last_admitted = Some(now);
        state.frames_admitted += 1;
        Some(state.frames_admitted)
    }

    /// Number of frames admitted so far
    pub fn frames_admitted(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames_admitted
    }
}
