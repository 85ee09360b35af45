use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use sitewhere_agent_envelope::{
    self as envelope, Acknowledge, CommandKind, DeviceAlert, DeviceLocation, DeviceMeasurements,
    EventKind, Measurement, RegisterDevice,
};
use sitewhere_agent_transport::{PubSubTransport, QoS};
use tracing::debug;

use crate::error::DispatchError;

pub type DispatchResult = std::result::Result<(), DispatchError>;

/// Publishes device events on the outbound topic.
///
/// One publish per call, at-least-once, no buffering and no retry. Shared
/// by the runtime and every handler through an `Arc`.
pub struct EventDispatcher {
    transport: Arc<dyn PubSubTransport>,
    topic: String,
}

impl EventDispatcher {
    pub fn new(transport: Arc<dyn PubSubTransport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn register_device(&self, hardware_id: &str, specification_token: &str) -> DispatchResult {
        let payload = RegisterDevice {
            hardware_id: hardware_id.to_string(),
            specification_token: specification_token.to_string(),
            site_token: None,
        };
        self.dispatch(EventKind::Registration, None, &payload)
    }

    pub fn acknowledge(
        &self,
        hardware_id: &str,
        message: &str,
        originator: Option<&str>,
    ) -> DispatchResult {
        let payload = Acknowledge {
            hardware_id: hardware_id.to_string(),
            message: Some(message.to_string()),
        };
        self.dispatch(EventKind::Acknowledgement, originator, &payload)
    }

    pub fn send_measurement(
        &self,
        hardware_id: &str,
        name: &str,
        value: f64,
        originator: Option<&str>,
    ) -> DispatchResult {
        let payload = DeviceMeasurements {
            hardware_id: hardware_id.to_string(),
            measurement: vec![Measurement {
                measurement_id: name.to_string(),
                measurement_value: value,
            }],
            event_date: Some(now_millis()),
        };
        self.dispatch(EventKind::Measurements, originator, &payload)
    }

    pub fn send_location(
        &self,
        hardware_id: &str,
        latitude: f64,
        longitude: f64,
        elevation: f64,
        originator: Option<&str>,
    ) -> DispatchResult {
        let payload = DeviceLocation {
            hardware_id: hardware_id.to_string(),
            latitude,
            longitude,
            elevation: Some(elevation),
            event_date: Some(now_millis()),
        };
        self.dispatch(EventKind::Location, originator, &payload)
    }

    pub fn send_alert(
        &self,
        hardware_id: &str,
        alert_type: &str,
        message: &str,
        originator: Option<&str>,
    ) -> DispatchResult {
        let payload = DeviceAlert {
            hardware_id: hardware_id.to_string(),
            alert_type: alert_type.to_string(),
            alert_message: message.to_string(),
            event_date: Some(now_millis()),
        };
        self.dispatch(EventKind::Alert, originator, &payload)
    }

    fn dispatch<M: Message>(
        &self,
        kind: EventKind,
        originator: Option<&str>,
        payload: &M,
    ) -> DispatchResult {
        let bytes = envelope::encode(kind, originator, payload).map_err(|source| {
            DispatchError::Encode {
                kind: kind.name(),
                source,
            }
        })?;

        self.transport
            .publish(&self.topic, &bytes, QoS::AtLeastOnce)
            .map_err(|source| DispatchError::Publish {
                kind: kind.name(),
                topic: self.topic.clone(),
                source,
            })?;

        debug!(
            kind = kind.name(),
            topic = %self.topic,
            originator = originator.unwrap_or(""),
            bytes = bytes.len(),
            "event dispatched"
        );
        Ok(())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
