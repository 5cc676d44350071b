use thiserror::Error;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker rejected or could not accept the message. Transient: the
    /// dispatcher leaves the envelope undelivered and retries on the next
    /// poll.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// A publish attempt did not complete within its timeout.
    #[error("Publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The transport has shut down.
    #[error("Transport closed")]
    Closed,
}
