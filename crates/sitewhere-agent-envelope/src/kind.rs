//! Command kinds carried in envelope headers.
//!
//! Device-to-platform envelopes are tagged with an [`EventKind`];
//! platform-to-device envelopes on the system channel carry a
//! [`SystemCommandKind`]. Both share the same header layout.

use std::fmt;

/// An enumerated header tag that selects the payload type.
pub trait CommandKind: Copy + fmt::Debug + Send + 'static {
    /// Wire value stored in the header.
    fn to_wire(self) -> i32;

    /// Parse a wire value. `None` for values this build does not know.
    fn from_wire(value: i32) -> Option<Self>;

    /// Stable upper-case name for logs and CLI output.
    fn name(self) -> &'static str;
}

/// Device-to-platform event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EventKind {
    Registration = 1,
    Acknowledgement = 2,
    Location = 3,
    Alert = 4,
    Measurements = 5,
    Stream = 6,
    StreamData = 7,
    RequestStreamData = 8,
}

impl CommandKind for EventKind {
    fn to_wire(self) -> i32 {
        self as i32
    }

    fn from_wire(value: i32) -> Option<Self> {
        EventKind::try_from(value).ok()
    }

    fn name(self) -> &'static str {
        match self {
            EventKind::Registration => "REGISTRATION",
            EventKind::Acknowledgement => "ACKNOWLEDGEMENT",
            EventKind::Location => "LOCATION",
            EventKind::Alert => "ALERT",
            EventKind::Measurements => "MEASUREMENTS",
            EventKind::Stream => "STREAM",
            EventKind::StreamData => "STREAM_DATA",
            EventKind::RequestStreamData => "REQUEST_STREAM_DATA",
        }
    }
}

/// Platform-to-device system command kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SystemCommandKind {
    RegistrationAck = 1,
    AckDeviceStream = 2,
    ReceiveDeviceStreamData = 3,
}

impl SystemCommandKind {
    /// Stream-related kinds the agent recognises but does not act on yet.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            SystemCommandKind::AckDeviceStream | SystemCommandKind::ReceiveDeviceStreamData
        )
    }
}

impl CommandKind for SystemCommandKind {
    fn to_wire(self) -> i32 {
        self as i32
    }

    fn from_wire(value: i32) -> Option<Self> {
        SystemCommandKind::try_from(value).ok()
    }

    fn name(self) -> &'static str {
        match self {
            SystemCommandKind::RegistrationAck => "REGISTRATION_ACK",
            SystemCommandKind::AckDeviceStream => "ACK_DEVICE_STREAM",
            SystemCommandKind::ReceiveDeviceStreamData => "RECEIVE_DEVICE_STREAM_DATA",
        }
    }
}
