//! Error types for the registry layer.

/// Why a frame could not be queued for a session.
///
/// Always per-recipient: a broadcast counts these, it never aborts on them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's outbox is at capacity (slow reader).
    #[error("outbox full")]
    Full,

    /// The session's writer has stopped.
    #[error("outbox closed")]
    Closed,
}
