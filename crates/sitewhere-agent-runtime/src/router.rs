use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sitewhere_agent_envelope::{
    decode_header, decode_payload, CommandKind, EnvelopeError, RegistrationAck,
    RegistrationAckError, RegistrationAckState, SystemCommandKind,
};
use tracing::{debug, error, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::{AgentError, Result};
use crate::handler::{lock_handler, SharedHandler};

/// Registered / unregistered flag, flipped by accepted registration acks.
#[derive(Debug, Default)]
pub struct RegistrationState {
    registered: AtomicBool,
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }
}

/// What the router did with a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    RegistrationAck { accepted: bool },
    /// Stream kinds are recognised but not acted on.
    Skipped(SystemCommandKind),
    /// Unknown kind or undecodable message.
    Ignored,
}

/// Routes system-channel envelopes to the fixed system handlers.
pub struct CommandRouter {
    handler: SharedHandler,
    dispatcher: Arc<EventDispatcher>,
    registration: Arc<RegistrationState>,
}

impl CommandRouter {
    pub(crate) fn new(
        handler: SharedHandler,
        dispatcher: Arc<EventDispatcher>,
        registration: Arc<RegistrationState>,
    ) -> Self {
        Self {
            handler,
            dispatcher,
            registration,
        }
    }

    /// Route one message, logging and absorbing any failure.
    pub fn handle(&self, payload: &[u8]) -> RouteOutcome {
        match self.route(payload) {
            Ok(outcome) => outcome,
            Err(AgentError::Envelope(EnvelopeError::UnknownCommandKind(kind))) => {
                warn!(kind, "ignoring system command of unknown kind");
                RouteOutcome::Ignored
            }
            Err(err @ AgentError::Envelope(_)) => {
                warn!(error = %err, "ignoring malformed system command");
                RouteOutcome::Ignored
            }
            Err(err) => {
                error!(error = %err, "system command handling failed");
                RouteOutcome::Ignored
            }
        }
    }

    /// Route one message.
    pub fn route(&self, payload: &[u8]) -> Result<RouteOutcome> {
        let (header, rest) = decode_header::<SystemCommandKind>(payload)?;
        debug!(
            kind = header.kind.name(),
            originator = header.originator.as_deref().unwrap_or(""),
            "routing system command"
        );

        match header.kind {
            SystemCommandKind::RegistrationAck => {
                let ack: RegistrationAck = decode_payload(rest)?;
                let accepted = ack.is_accepted();
                if accepted {
                    self.registration.mark_registered();
                } else {
                    let error_type = ack
                        .error_type
                        .and_then(|value| RegistrationAckError::try_from(value).ok());
                    warn!(
                        state = ?RegistrationAckState::try_from(ack.state).ok(),
                        error_type = ?error_type,
                        error_message = ack.error_message.as_deref().unwrap_or(""),
                        "device registration was rejected"
                    );
                }
                lock_handler(&self.handler).on_registration_ack(&header, &ack, &self.dispatcher)?;
                Ok(RouteOutcome::RegistrationAck { accepted })
            }
            kind => {
                debug_assert!(kind.is_stream());
                Ok(RouteOutcome::Skipped(kind))
            }
        }
    }
}
