use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Delivery quality-of-service for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery; duplicates are possible.
    #[default]
    AtLeastOnce,
}

impl QoS {
    /// Wire value used in MQTT fixed headers and subscription requests.
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }

    /// Parse a wire value. QoS 2 is not supported by this transport.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// A topic filter paired with the requested delivery guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    /// Subscribe with at-least-once delivery.
    pub fn at_least_once(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
        }
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw message payload.
    pub payload: Bytes,
    /// Delivery guarantee the broker used for this message.
    pub qos: QoS,
    /// Packet identifier that must be acknowledged (QoS 1 only).
    pub packet_id: Option<u16>,
}

impl InboundMessage {
    /// Create an unacknowledged (QoS 0) message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
        }
    }
}

/// Where and how to reach the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub hostname: String,
    pub port: u16,
    /// Client identifier presented during the handshake.
    pub client_id: String,
    /// Keep-alive interval. `None` disables broker-side liveness checks.
    pub keep_alive: Option<Duration>,
    /// Bound on the TCP connect + handshake exchange only.
    pub connect_timeout: Duration,
}

impl BrokerOptions {
    /// `hostname:port`, as used for socket addressing and diagnostics.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1883,
            client_id: "sitewhere-agent".to_string(),
            keep_alive: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerOptions")
            .field("address", &self.address())
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// A connected publish/subscribe session.
///
/// Implementations must allow `publish` from one thread while another
/// thread is blocked in `receive`.
pub trait PubSubTransport: Send + Sync {
    /// Publish a payload on a topic.
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<()>;

    /// Subscribe to a set of topics. Blocks until the broker confirms.
    fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()>;

    /// Block until the next inbound message arrives.
    ///
    /// Returns `TransportError::Disconnected` once the session is closed.
    fn receive(&self) -> Result<InboundMessage>;

    /// Acknowledge receipt of an inbound message. No-op for QoS 0.
    fn acknowledge(&self, message: &InboundMessage) -> Result<()>;

    /// Close the session. Calling this more than once is not an error.
    fn disconnect(&self) -> Result<()>;

    /// Whether the session is still open.
    fn is_connected(&self) -> bool;
}

/// Opens transport sessions.
pub trait Connector {
    /// Connect and complete the broker handshake.
    fn connect(&self, options: &BrokerOptions) -> Result<Arc<dyn PubSubTransport>>;
}
