//! Port traits (interfaces) for dependency injection

pub mod backend;
pub mod storage;

pub use backend::{EnvelopeListener, MessageBackend, Subscription};
pub use storage::{OutboxPersistence, OutboxSnapshot, SnapshotRecord};
