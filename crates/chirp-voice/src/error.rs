use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the external capability clients.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("classification error: {0}")]
    Classification(String),

    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid capability configuration: {0}")]
    Config(String),
}
