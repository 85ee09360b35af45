use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::DeviceIdentity;
use crate::dispatcher::EventDispatcher;
use crate::error::{AgentError, Result};
use crate::handler::{lock_handler, SharedHandler};
use crate::invocation::{describe_signature, InvocationRecord};
use crate::registry::Call;

/// Which signature an application command resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The operation takes the originator as its last parameter.
    WithOriginator,
    /// Only the argument signature matched; the originator was dropped.
    WithoutOriginator,
}

/// Resolves application commands against the active handler.
pub struct CommandProcessor {
    handler: SharedHandler,
    dispatcher: Arc<EventDispatcher>,
    identity: DeviceIdentity,
}

impl CommandProcessor {
    pub(crate) fn new(
        handler: SharedHandler,
        dispatcher: Arc<EventDispatcher>,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            handler,
            dispatcher,
            identity,
        }
    }

    /// Decode and invoke one command-channel payload, logging any failure.
    ///
    /// Never fails; `None` means the message was dropped.
    pub fn handle(&self, payload: &[u8]) -> Option<Resolution> {
        match self.process(payload) {
            Ok(resolution) => Some(resolution),
            Err(err @ AgentError::NoMatchingOperation { .. }) => {
                warn!(error = %err, "dropping command");
                None
            }
            Err(err) => {
                error!(error = %err, "command processing failed");
                None
            }
        }
    }

    /// Decode and invoke one command-channel payload.
    pub fn process(&self, payload: &[u8]) -> Result<Resolution> {
        let record = InvocationRecord::decode(payload)?;
        self.invoke(&record)
    }

    /// Invoke a decoded record.
    ///
    /// The originator-aware signature is tried first; otherwise the plain
    /// argument signature is tried and the originator ignored.
    pub fn invoke(&self, record: &InvocationRecord) -> Result<Resolution> {
        let mut handler = lock_handler(&self.handler);

        let with_originator = record.signature_with_originator();
        let (signature, resolution) = if handler.supports(&record.command, &with_originator) {
            (with_originator, Resolution::WithOriginator)
        } else {
            let plain = record.signature();
            if !handler.supports(&record.command, &plain) {
                return Err(AgentError::NoMatchingOperation {
                    command: record.command.clone(),
                    signature: describe_signature(&plain),
                });
            }
            (plain, Resolution::WithoutOriginator)
        };

        let call = Call {
            command: &record.command,
            args: &record.arguments,
            originator: match resolution {
                Resolution::WithOriginator => record.originator.as_deref(),
                Resolution::WithoutOriginator => None,
            },
            identity: &self.identity,
            dispatcher: &self.dispatcher,
        };

        debug!(
            command = %record.command,
            handler = handler.name(),
            resolution = ?resolution,
            "invoking command"
        );
        match handler.call(&signature, &call) {
            Some(result) => result.map(|()| resolution),
            None => Err(AgentError::NoMatchingOperation {
                command: record.command.clone(),
                signature: describe_signature(&signature),
            }),
        }
    }
}
