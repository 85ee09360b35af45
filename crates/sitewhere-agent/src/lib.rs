//! Device-side communication agent for the SiteWhere platform.
//!
//! The agent keeps one MQTT connection to the platform broker, publishes
//! device events as protobuf envelopes and executes platform commands on a
//! pluggable handler.
//!
//! # Crate Structure
//!
//! - [`transport`]: publish/subscribe transport (MQTT client, in-memory loopback)
//! - [`envelope`]: length-delimited protobuf envelope codec
//! - [`runtime`]: configuration, dispatcher, router, command processor and lifecycle

/// Re-export transport types.
pub mod transport {
    pub use sitewhere_agent_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use sitewhere_agent_envelope::*;
}

/// Re-export runtime types.
pub mod runtime {
    pub use sitewhere_agent_runtime::*;
}

pub use sitewhere_agent_runtime::{
    Agent, AgentError, AgentSettings, CommandHandler, EventDispatcher, HandlerFactory,
    OperationRegistry, RunningAgent,
};
pub use sitewhere_agent_transport::MqttConnector;
