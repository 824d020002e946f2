use thiserror::Error;

/// Errors surfaced by the pipeline service API.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A transport operation failed during start or submit.
    #[error("transport error: {0}")]
    Transport(#[from] chirp_mq::TransportError),

    /// `submit` was called while the service was stopped.
    #[error("pipeline service is not running")]
    NotRunning,
}
