//! Topic-based message transport for the chirp backend.
//!
//! Implements the queue boundary the pipeline and the report scheduler are
//! built against: publish-by-topic with at-least-once delivery, durable
//! consumer groups bounded by a fixed-size worker pool, broker-owned
//! redelivery with attempt counting and dead-lettering, and an ordered
//! shutdown that drains in-flight handlers.
//!
//! The broker itself runs in-process. The API is shaped so a deployment can
//! substitute an external broker client without touching any consumer code:
//! serialization, payload limits, ack/nack semantics and the worker-pool
//! discipline all live on this side of the boundary.

mod error;
mod transport;

pub use error::{HandlerError, TransportError};
pub use transport::{DeadLetter, Delivery, Transport, TransportConfig};
