//! Live-connection registry for the chirp backend.
//!
//! Tracks the single active push channel per user, serializes concurrent
//! writers on a per-connection lock, and exposes the read-only child→parent
//! directory used to route emotion reports. Delivery is best-effort: pushing
//! to a user with no live connection is a defined no-op, not an error;
//! there is no retained mailbox for offline users.

mod frame;
mod parent;
mod registry;

pub use frame::PushFrame;
pub use parent::ParentDirectory;
pub use registry::{Connection, ConnectionRegistry, PushSink, RegistryError};
