//! Protobuf message definitions for envelope headers and payloads.
//!
//! Field numbers match the SiteWhere device provisioning schema, so agents
//! built on this crate interoperate with the platform's protobuf decoder.

/// Envelope header shared by both directions.
///
/// `command` holds the raw wire value so headers carrying kinds unknown to
/// this build still decode; see [`crate::CommandKind::from_wire`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(int32, required, tag = "1")]
    pub command: i32,
    #[prost(string, optional, tag = "2")]
    pub originator: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub nested_path: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub nested_spec: Option<String>,
}

/// Registers the device with the platform.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterDevice {
    #[prost(string, required, tag = "1")]
    pub hardware_id: String,
    #[prost(string, required, tag = "2")]
    pub specification_token: String,
    #[prost(string, optional, tag = "4")]
    pub site_token: Option<String>,
}

/// Acknowledges a command received from the platform.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Acknowledge {
    #[prost(string, required, tag = "1")]
    pub hardware_id: String,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
}

/// A single named measurement value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Measurement {
    #[prost(string, required, tag = "1")]
    pub measurement_id: String,
    #[prost(double, required, tag = "2")]
    pub measurement_value: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceMeasurements {
    #[prost(string, required, tag = "1")]
    pub hardware_id: String,
    #[prost(message, repeated, tag = "2")]
    pub measurement: Vec<Measurement>,
    /// Milliseconds since the Unix epoch.
    #[prost(fixed64, optional, tag = "3")]
    pub event_date: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceLocation {
    #[prost(string, required, tag = "1")]
    pub hardware_id: String,
    #[prost(double, required, tag = "2")]
    pub latitude: f64,
    #[prost(double, required, tag = "3")]
    pub longitude: f64,
    #[prost(double, optional, tag = "4")]
    pub elevation: Option<f64>,
    /// Milliseconds since the Unix epoch.
    #[prost(fixed64, optional, tag = "5")]
    pub event_date: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceAlert {
    #[prost(string, required, tag = "1")]
    pub hardware_id: String,
    #[prost(string, required, tag = "2")]
    pub alert_type: String,
    #[prost(string, required, tag = "3")]
    pub alert_message: String,
    /// Milliseconds since the Unix epoch.
    #[prost(fixed64, optional, tag = "4")]
    pub event_date: Option<u64>,
}

/// Outcome of a registration request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RegistrationAckState {
    NewRegistration = 1,
    AlreadyRegistered = 2,
    RegistrationError = 3,
}

/// Reason a registration was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RegistrationAckError {
    InvalidSpecification = 1,
    SiteTokenRequired = 2,
    NewDevicesNotAllowed = 3,
}

/// Platform response to [`RegisterDevice`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegistrationAck {
    #[prost(enumeration = "RegistrationAckState", required, tag = "1")]
    pub state: i32,
    #[prost(enumeration = "RegistrationAckError", optional, tag = "2")]
    pub error_type: Option<i32>,
    #[prost(string, optional, tag = "3")]
    pub error_message: Option<String>,
}

impl RegistrationAck {
    /// True for `NEW_REGISTRATION` and `ALREADY_REGISTERED`.
    pub fn is_accepted(&self) -> bool {
        matches!(
            RegistrationAckState::try_from(self.state),
            Ok(RegistrationAckState::NewRegistration | RegistrationAckState::AlreadyRegistered)
        )
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn registration_ack_acceptance() {
        let mut ack = RegistrationAck {
            state: RegistrationAckState::NewRegistration as i32,
            ..Default::default()
        };
        assert!(ack.is_accepted());

        ack.state = RegistrationAckState::AlreadyRegistered as i32;
        assert!(ack.is_accepted());

        ack.state = RegistrationAckState::RegistrationError as i32;
        ack.error_type = Some(RegistrationAckError::InvalidSpecification as i32);
        assert!(!ack.is_accepted());

        ack.state = 42;
        assert!(!ack.is_accepted());
    }

    #[test]
    fn absent_optional_fields_are_not_written() {
        let ack = Acknowledge {
            hardware_id: "dev-1".to_string(),
            message: None,
        };
        let bytes = ack.encode_to_vec();
        // tag 1, length 5, "dev-1"
        assert_eq!(bytes, [0x0A, 0x05, b'd', b'e', b'v', b'-', b'1']);
    }

    #[test]
    fn location_field_layout() {
        let location = DeviceLocation {
            hardware_id: "d".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            elevation: None,
            event_date: None,
        };
        let decoded = DeviceLocation::decode(location.encode_to_vec().as_slice())
            .expect("location should decode");
        assert_eq!(decoded, location);
    }
}
