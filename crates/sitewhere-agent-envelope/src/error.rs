/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The input is truncated or not valid for the expected message type.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// The header names a command kind this build does not know.
    ///
    /// Newer platform versions may add kinds; callers log and skip these.
    #[error("unknown command kind {0}")]
    UnknownCommandKind(i32),

    /// A message could not be written to the output buffer.
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] prost::EncodeError),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
