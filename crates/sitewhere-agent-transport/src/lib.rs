//! Publish/subscribe transport abstraction for the SiteWhere device agent.
//!
//! The agent talks to exactly one broker over exactly one connection. This
//! crate defines the blocking [`PubSubTransport`] contract the agent runtime
//! consumes and ships two implementations:
//! - [`MqttClient`]: MQTT 3.1.1 over TCP
//! - [`MemoryTransport`]: in-process loopback for tests and embedding
//!
//! This is the lowest layer of the agent. Everything else builds on the
//! [`PubSubTransport`] and [`Connector`] traits provided here.

pub mod error;
pub mod memory;
pub mod mqtt;
pub mod packet;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryConnector, MemoryTransport, PublishedMessage};
pub use mqtt::{MqttClient, MqttConnector};
pub use traits::{BrokerOptions, Connector, InboundMessage, PubSubTransport, QoS, Subscription};
