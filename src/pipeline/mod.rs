pub mod annotate;
pub mod decode;
pub mod gate;
pub mod normalize;
pub mod sink;
pub mod stage;
pub mod symbol;

pub use annotate::Annotator;
pub use decode::{DecoderAdapter, SymbolDecoder};
pub use gate::{AdmissionGate, AdmissionMode};
pub use sink::Sink;
pub use stage::{FlowStatus, FrameStage, StageOutcome};
pub use symbol::{BoundingBox, DecodedSymbol, SymbolKind};
