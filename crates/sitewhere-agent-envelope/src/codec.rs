use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::error::{EnvelopeError, Result};
use crate::kind::CommandKind;
use crate::messages::Header;

/// A decoded envelope header with a recognised command kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader<K> {
    pub kind: K,
    /// Correlates a response with the command that triggered it.
    pub originator: Option<String>,
    pub nested_path: Option<String>,
    pub nested_spec: Option<String>,
}

impl<K: CommandKind> EnvelopeHeader<K> {
    /// Header with only a kind and an optional originator.
    pub fn new(kind: K, originator: Option<&str>) -> Self {
        Self {
            kind,
            originator: originator.map(str::to_string),
            nested_path: None,
            nested_spec: None,
        }
    }

    fn to_message(&self) -> Header {
        Header {
            command: self.kind.to_wire(),
            originator: self.originator.clone(),
            nested_path: self.nested_path.clone(),
            nested_spec: self.nested_spec.clone(),
        }
    }
}

/// A fully decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<K, M> {
    pub header: EnvelopeHeader<K>,
    pub payload: M,
}

/// Encode an envelope into a new buffer.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────────┬──────────────┬─────────────────┐
/// │ Header len   │ Header         │ Payload len  │ Payload         │
/// │ (varint)     │ (protobuf)     │ (varint)     │ (protobuf)      │
/// └──────────────┴────────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode<K: CommandKind, M: Message>(
    kind: K,
    originator: Option<&str>,
    payload: &M,
) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_into(&EnvelopeHeader::new(kind, originator), payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode an envelope with an explicit header, appending to `dst`.
pub fn encode_into<K: CommandKind, M: Message>(
    header: &EnvelopeHeader<K>,
    payload: &M,
    dst: &mut BytesMut,
) -> Result<()> {
    let header = header.to_message();
    dst.reserve(header.encoded_len() + payload.encoded_len() + 2 * 10);
    header.encode_length_delimited(dst)?;
    payload.encode_length_delimited(dst)?;
    Ok(())
}

/// Decode only the header, returning it with the unread remainder.
///
/// The remainder holds the length-delimited payload; pass it to
/// [`decode_payload`] with the message type the kind implies.
pub fn decode_header<K: CommandKind>(src: &[u8]) -> Result<(EnvelopeHeader<K>, &[u8])> {
    let mut rest = src;
    let header = Header::decode_length_delimited(&mut rest)?;
    let kind = K::from_wire(header.command)
        .ok_or(EnvelopeError::UnknownCommandKind(header.command))?;

    Ok((
        EnvelopeHeader {
            kind,
            originator: header.originator,
            nested_path: header.nested_path,
            nested_spec: header.nested_spec,
        },
        rest,
    ))
}

/// Decode the length-delimited payload that follows a header.
pub fn decode_payload<M: Message + Default>(rest: &[u8]) -> Result<M> {
    let mut rest = rest;
    Ok(M::decode_length_delimited(&mut rest)?)
}

/// Decode header and payload in one step when the payload type is known.
pub fn decode<K: CommandKind, M: Message + Default>(src: &[u8]) -> Result<Envelope<K, M>> {
    let (header, rest) = decode_header(src)?;
    let payload = decode_payload(rest)?;
    Ok(Envelope { header, payload })
}
