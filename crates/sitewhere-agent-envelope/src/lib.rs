//! Envelope codec for the SiteWhere device protocol.
//!
//! Every message on the system channels is a two-part envelope:
//! - A length-delimited `Header` naming the command kind and an optional
//!   originator used to correlate responses
//! - A length-delimited payload whose message type is implied by the kind
//!
//! Header and payload are protobuf messages, each prefixed with its varint
//! encoded length. The header is decoded first; the caller then decodes the
//! payload it expects for that kind.

pub mod codec;
pub mod error;
pub mod kind;
pub mod messages;

pub use codec::{
    decode, decode_header, decode_payload, encode, encode_into, Envelope, EnvelopeHeader,
};
pub use error::{EnvelopeError, Result};
pub use kind::{CommandKind, EventKind, SystemCommandKind};
pub use messages::{
    Acknowledge, DeviceAlert, DeviceLocation, DeviceMeasurements, Header, Measurement,
    RegisterDevice, RegistrationAck, RegistrationAckError, RegistrationAckState,
};
