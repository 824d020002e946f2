//! External-capability boundary for the chirp voice pipeline.
//!
//! The pipeline consumes four capabilities through narrow trait seams:
//! speech recognition, reply generation, speech synthesis, and emotion
//! classification. The production implementations here are HTTP clients to
//! the respective inference services; the inference internals are not this
//! backend's concern. The speech segmenter is the one capability that runs
//! locally: it is signal math over PCM frames, not a model call.

mod capability;
mod client;
mod config;
mod error;
mod segmenter;

pub use capability::{EmotionClassifier, ReplyGenerator, SpeechRecognizer, SpeechSynthesizer};
pub use client::{HttpClassifier, HttpGenerator, HttpRecognizer, HttpSynthesizer};
pub use config::CapabilityConfig;
pub use error::CapabilityError;
pub use segmenter::{Segmenter, SegmenterConfig, SpeechSegment};
