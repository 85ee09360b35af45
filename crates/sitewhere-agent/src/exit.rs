use std::fmt;
use std::io;

use sitewhere_agent_envelope::EnvelopeError;
use sitewhere_agent_runtime::{AgentError, ConfigError};
use sitewhere_agent_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    match err {
        ConfigError::Read { source, path } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        other => CliError::new(CONFIG_INVALID, format!("{context}: {other}")),
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn envelope_error(context: &str, err: EnvelopeError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn agent_error(context: &str, err: AgentError) -> CliError {
    match err {
        AgentError::Configuration(err) => config_error(context, err),
        AgentError::Connection(err) => transport_error(context, err),
        AgentError::UnknownHandler(_) => CliError::new(CONFIG_INVALID, format!("{context}: {err}")),
        AgentError::Envelope(err) => envelope_error(context, err),
        AgentError::Invocation(_) | AgentError::NoMatchingOperation { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        AgentError::Spawn(source) => io_error(context, source),
        AgentError::Panicked { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
