//! Offline-tolerant outbox: message cache, pending queue, live subscription

mod events;
mod store;

pub use events::OutboxEvent;
pub use store::{
    Conversation, DroppedMessage, FailedSend, OutboxStore, ReconcileReport, SendOutcome,
    SyncedMessage,
};
