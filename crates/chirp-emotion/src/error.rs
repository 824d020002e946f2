use thiserror::Error;

/// Errors that can occur in the emotion store and scheduler.
#[derive(Debug, Error)]
pub enum EmotionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),

    #[error("invalid stored emotion label '{0}'")]
    Label(String),

    #[error("transport error: {0}")]
    Transport(#[from] chirp_mq::TransportError),

    #[error("blocking task join error: {0}")]
    Join(String),
}
