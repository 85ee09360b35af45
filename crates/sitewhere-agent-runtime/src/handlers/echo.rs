use tracing::info;

use crate::handler::CommandHandler;
use crate::invocation::ArgType;
use crate::registry::OperationRegistry;

/// Acknowledges every `echo(message)` command with the same message.
#[derive(Debug, Default)]
pub struct EchoHandler {
    echoed: u64,
}

impl EchoHandler {
    pub const NAME: &'static str = "EchoHandler";

    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

impl CommandHandler for EchoHandler {
    fn operations(registry: &mut OperationRegistry<Self>) {
        registry.register_with_originator("echo", &[ArgType::String], |handler: &mut Self, call| {
            let message = call.string(0)?;
            info!(message = %message, "echo command received");
            call.dispatcher
                .acknowledge(call.hardware_id(), message, call.originator)?;
            handler.echoed += 1;
            Ok(())
        });
    }
}
