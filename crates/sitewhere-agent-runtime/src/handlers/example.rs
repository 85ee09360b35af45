use sitewhere_agent_envelope::{
    EnvelopeHeader, RegistrationAck, RegistrationAckState, SystemCommandKind,
};
use tracing::info;

use crate::config::DeviceIdentity;
use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::handler::CommandHandler;
use crate::invocation::ArgType;
use crate::registry::OperationRegistry;

/// Demonstration handler.
///
/// Registers the device at startup and answers `ping()`, `testEvents()` and
/// `serialPrintln(message)`, correlating every response with the command's
/// originator.
#[derive(Debug, Default)]
pub struct ExampleHandler {
    registered: bool,
}

impl ExampleHandler {
    pub const NAME: &'static str = "ExampleHandler";

    /// Whether the last registration acknowledgement was accepted.
    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

impl CommandHandler for ExampleHandler {
    fn operations(registry: &mut OperationRegistry<Self>) {
        registry
            .register_with_originator("ping", &[], |_handler: &mut Self, call| {
                info!("ping command received");
                call.dispatcher
                    .acknowledge(call.hardware_id(), "Acknowledged.", call.originator)?;
                Ok(())
            })
            .register_with_originator("testEvents", &[], |_handler: &mut Self, call| {
                let hardware_id = call.hardware_id();
                call.dispatcher
                    .send_measurement(hardware_id, "engine.temp", 170.0, call.originator)?;
                call.dispatcher
                    .send_location(hardware_id, 33.7550, -84.3900, 0.0, call.originator)?;
                call.dispatcher.send_alert(
                    hardware_id,
                    "engine.overheat",
                    "Engine is overheating!",
                    call.originator,
                )?;
                Ok(())
            })
            .register_with_originator(
                "serialPrintln",
                &[ArgType::String],
                |_handler: &mut Self, call| {
                    let message = call.string(0)?;
                    info!(message = %message, "serial println");
                    call.dispatcher.acknowledge(
                        call.hardware_id(),
                        "Message sent to Serial.println().",
                        call.originator,
                    )?;
                    Ok(())
                },
            );
    }

    fn startup(&mut self, identity: &DeviceIdentity, dispatcher: &EventDispatcher) -> Result<()> {
        dispatcher.register_device(identity.hardware_id(), identity.specification_token())?;
        info!(hardware_id = %identity.hardware_id(), "sent registration request");
        Ok(())
    }

    fn on_registration_ack(
        &mut self,
        _header: &EnvelopeHeader<SystemCommandKind>,
        ack: &RegistrationAck,
        _dispatcher: &EventDispatcher,
    ) -> Result<()> {
        match RegistrationAckState::try_from(ack.state) {
            Ok(RegistrationAckState::NewRegistration) => {
                info!("SiteWhere indicated device was successfully registered");
            }
            Ok(RegistrationAckState::AlreadyRegistered) => {
                info!("SiteWhere indicated device is using an existing registration");
            }
            _ => {
                info!(
                    error = ack.error_message.as_deref().unwrap_or(""),
                    "SiteWhere indicated registration failed"
                );
            }
        }
        self.registered = ack.is_accepted();
        Ok(())
    }
}
