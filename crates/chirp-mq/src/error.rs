use thiserror::Error;

/// Errors surfaced by the transport API.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has begun shutting down; no new messages are accepted.
    #[error("transport is closed")]
    Closed,

    /// The serialized payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Serialized payload size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A consumer group is already registered for this topic.
    #[error("topic '{0}' already has a consumer group")]
    AlreadySubscribed(String),
}

/// Failure returned by a message handler.
///
/// Returning this from a handler nacks the message: the broker schedules a
/// delayed redelivery with an incremented attempt counter, and dead-letters
/// the message once the configured maximum attempt count is reached. The
/// handler's return value is the sole ack/nack signal; there is no other
/// channel back to the broker.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Creates a handler error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}
