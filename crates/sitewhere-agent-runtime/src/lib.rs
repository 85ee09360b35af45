//! Runtime for the SiteWhere device agent.
//!
//! Wires a [`PubSubTransport`](sitewhere_agent_transport::PubSubTransport)
//! to the device's handler:
//! - [`EventDispatcher`] publishes device events on the outbound topic
//! - [`CommandRouter`] handles system commands (registration acks, streams)
//! - [`CommandProcessor`] resolves application commands against the
//!   handler's [`OperationRegistry`]
//! - [`Agent`] owns the connection and the single inbound processing thread
//!
//! ```no_run
//! use sitewhere_agent_runtime::{Agent, AgentSettings};
//! use sitewhere_agent_transport::MqttConnector;
//!
//! let settings = AgentSettings::from_properties_file("agent.properties")?;
//! let agent = Agent::from_settings(&settings)?.start(&MqttConnector)?;
//! agent.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod invocation;
pub mod processor;
pub mod registry;
pub mod router;
pub mod runtime;

pub use config::{AgentConfig, AgentSettings, ChannelBinding, DeviceIdentity, InboundChannel};
pub use dispatcher::{DispatchResult, EventDispatcher};
pub use error::{AgentError, ConfigError, DispatchError, InvocationError, MissingSetting, Result};
pub use handler::{CommandHandler, HandlerFactory, HandlerInstance};
pub use handlers::{BaseHandler, EchoHandler, ExampleHandler};
pub use invocation::{describe_signature, ArgType, ArgValue, InvocationRecord};
pub use processor::{CommandProcessor, Resolution};
pub use registry::{Call, OperationKey, OperationRegistry};
pub use router::{CommandRouter, RegistrationState, RouteOutcome};
pub use runtime::{Agent, AgentState, RunningAgent, ShutdownHandle};
