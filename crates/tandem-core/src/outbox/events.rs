/// Change notifications for UI glue.
///
/// Delivered over a broadcast channel; slow receivers may miss events and
/// should re-read the store accessors when they lag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// The message cache changed
    MessagesUpdated { count: usize, unread_count: usize },
    /// A message entered the pending queue
    MessageQueued { local_id: String },
    MessageSynced { local_id: String, message_id: String },
    /// A pending message ran out of retries and left the queue
    MessageDropped { local_id: String, attempts: u32 },
    DecryptionFailed { envelope_id: String, reason: String },
    /// Writing the local snapshot failed; in-memory state is still current
    PersistFailed { reason: String },
}
