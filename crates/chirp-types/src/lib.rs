//! Shared types and constants for the chirp platform.
//!
//! This crate provides the foundational types used across all chirp crates:
//! the voice task spine and its per-stage envelopes, the emotion domain
//! types (signals, reports, labels), and the queue topic names.
//!
//! No crate in the workspace depends on anything *except* `chirp-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod emotion;
pub mod voice;

pub use emotion::{EmotionLabel, EmotionReport, EmotionSignal, ParseEmotionLabelError};
pub use voice::{
    GenerationResult, ProcessingStatus, RecognitionResult, SegmentationResult, SynthesisResult,
    TaskSpine, VoiceTask,
};

/// Queue topic names, one per pipeline stage plus the report events.
///
/// Topic strings are stable: they name consumer groups on the broker side
/// and must not change between releases without a migration plan.
pub mod topics {
    /// Input topic of the segmentation stage; `VoiceTask` payloads.
    pub const VOICE_SEGMENTATION: &str = "voice.segmentation";
    /// Input topic of the recognition stage; `SegmentationResult` payloads.
    pub const VOICE_RECOGNITION: &str = "voice.recognition";
    /// Input topic of the generation stage; `RecognitionResult` payloads.
    pub const VOICE_GENERATION: &str = "voice.generation";
    /// Input topic of the synthesis stage; `GenerationResult` payloads.
    pub const VOICE_SYNTHESIS: &str = "voice.synthesis";
    /// Report-generated events, keyed by report id.
    pub const REPORT_GENERATED: &str = "emotion.report.generated";
    /// Report-push events, keyed by user id.
    pub const REPORT_PUSH: &str = "emotion.report.push";
}
