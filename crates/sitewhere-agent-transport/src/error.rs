/// Errors that can occur in publish/subscribe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open a connection to the broker.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// The broker rejected or botched the connection handshake.
    #[error("broker handshake failed: {0}")]
    Handshake(String),

    /// The broker sent something that violates the protocol.
    ///
    /// The offending packet has been consumed; the session is still usable.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The inbound byte stream can no longer be split into packets.
    ///
    /// The session is closed when this is returned.
    #[error("unrecoverable framing error: {0}")]
    Framing(String),

    /// An I/O error occurred on an established connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker refused one or more subscriptions.
    #[error("subscription to '{topic}' refused by broker")]
    SubscriptionRefused { topic: String },

    /// The connection has been closed, locally or by the broker.
    #[error("transport disconnected")]
    Disconnected,

    /// A blocking receive was interrupted on purpose.
    #[error("receive interrupted")]
    Interrupted,
}

impl TransportError {
    /// True when the error means the connection is gone for good.
    ///
    /// Receive loops treat these as a shutdown signal rather than a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::Disconnected | TransportError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
