//! Trait seams for the four external capabilities.
//!
//! The pipeline stages depend on these traits, never on the HTTP clients
//! directly, so stage behavior is testable with fakes.

use crate::error::CapabilityError;
use async_trait::async_trait;
use chirp_types::EmotionLabel;

/// Turns an audio segment into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio: &[u8]) -> Result<String, CapabilityError>;
}

/// Turns recognized child speech into a reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<String, CapabilityError>;
}

/// Turns reply text into audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, CapabilityError>;
}

/// Classifies the emotion of one chat message.
///
/// Consumed by the emotion-inference collaborator that records
/// `EmotionSignal`s; the pipeline itself never calls it.
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<(EmotionLabel, f64), CapabilityError>;
}
