use std::fmt;
use std::path::PathBuf;

use sitewhere_agent_envelope::EnvelopeError;
use sitewhere_agent_transport::TransportError;

use crate::invocation::ArgType;

/// A required setting that was absent or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSetting {
    /// Setting name as documented (camelCase form).
    pub key: &'static str,
    /// What the setting is for.
    pub reason: &'static str,
}

impl fmt::Display for MissingSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not specified ({})", self.key, self.reason)
    }
}

/// Errors raised while loading or validating agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more required settings are missing. Every missing key is listed.
    #[error("configuration invalid: {}", describe_missing(.0))]
    MissingRequired(Vec<MissingSetting>),

    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn describe_missing(missing: &[MissingSetting]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outbound event could not be delivered to the transport.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode {kind} event: {source}")]
    Encode {
        kind: &'static str,
        source: EnvelopeError,
    },

    #[error("failed to publish {kind} event on '{topic}': {source}")]
    Publish {
        kind: &'static str,
        topic: String,
        source: TransportError,
    },
}

/// Errors raised while decoding or resolving an application command.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("invocation record could not be decoded: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invocation record could not be encoded: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("'{command}' argument {index}: expected {expected}, got {actual}")]
    ArgumentType {
        command: String,
        index: usize,
        expected: ArgType,
        actual: ArgType,
    },

    #[error("'{command}' has no argument {index}")]
    MissingArgument { command: String, index: usize },
}

/// Top-level agent error.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Broker unreachable or handshake failure at startup.
    #[error("unable to establish broker connection: {0}")]
    Connection(#[source] TransportError),

    /// The configured handler identifier has no registered factory.
    #[error("unknown command handler '{0}'")]
    UnknownHandler(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Neither the originator-aware nor the plain signature is registered.
    #[error("no operation '{command}' accepting ({signature})")]
    NoMatchingOperation { command: String, signature: String },

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// Raised by handler code for its own failures.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A handler hook or operation panicked. The panic was contained.
    #[error("handler '{handler}' panicked in {hook}: {message}")]
    Panicked {
        handler: String,
        hook: String,
        message: String,
    },

    #[error("failed to spawn inbound processing thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl AgentError {
    /// Convenience for handler implementations.
    pub fn handler(message: impl Into<String>) -> Self {
        AgentError::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
