//! MQTT 3.1.1 control packet codec.
//!
//! Only the packets a QoS 0/1 client and its broker exchange are modelled.
//! The broker's side (encoding CONNACK/SUBACK, decoding CONNECT/SUBSCRIBE)
//! is compiled for the in-crate test brokers only.
//! Decoding follows the MQTT 3.1.1 framing rules: one fixed-header byte,
//! a 1-4 byte variable-length "remaining length", then the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::QoS;

/// Largest remaining length MQTT can express.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default cap on inbound packet bodies: 16 MiB.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// An MQTT control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keep_alive: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        packet_id: Option<u16>,
        dup: bool,
        retain: bool,
    },
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        topics: Vec<(String, QoS)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "CONNECT",
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish { .. } => "PUBLISH",
            Packet::PubAck { .. } => "PUBACK",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubAck { .. } => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}

/// Human-readable reason for a CONNACK return code.
pub fn connack_reason(code: u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Encode a packet into `dst`.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::new();
    let first_byte = match packet {
        Packet::Connect {
            client_id,
            keep_alive,
            clean_session,
        } => {
            put_string(&mut body, PROTOCOL_NAME)?;
            body.put_u8(PROTOCOL_LEVEL);
            body.put_u8(if *clean_session { CLEAN_SESSION } else { 0 });
            body.put_u16(*keep_alive);
            put_string(&mut body, client_id)?;
            CONNECT << 4
        }
        #[cfg(test)]
        Packet::ConnAck {
            session_present,
            return_code,
        } => {
            body.put_u8(u8::from(*session_present));
            body.put_u8(*return_code);
            CONNACK << 4
        }
        Packet::Publish {
            topic,
            payload,
            qos,
            packet_id,
            dup,
            retain,
        } => {
            put_string(&mut body, topic)?;
            match (qos, packet_id) {
                (QoS::AtMostOnce, _) => {}
                (QoS::AtLeastOnce, Some(id)) => body.put_u16(*id),
                (QoS::AtLeastOnce, None) => {
                    return Err(TransportError::Protocol(
                        "QoS 1 publish requires a packet id".to_string(),
                    ))
                }
            }
            body.put_slice(payload);
            let mut flags = qos.as_u8() << 1;
            if *dup {
                flags |= 0x08;
            }
            if *retain {
                flags |= 0x01;
            }
            (PUBLISH << 4) | flags
        }
        Packet::PubAck { packet_id } => {
            body.put_u16(*packet_id);
            PUBACK << 4
        }
        Packet::Subscribe { packet_id, topics } => {
            body.put_u16(*packet_id);
            for (topic, qos) in topics {
                put_string(&mut body, topic)?;
                body.put_u8(qos.as_u8());
            }
            // SUBSCRIBE carries the mandatory 0b0010 reserved flags.
            (SUBSCRIBE << 4) | 0x02
        }
        #[cfg(test)]
        Packet::SubAck {
            packet_id,
            return_codes,
        } => {
            body.put_u16(*packet_id);
            body.put_slice(return_codes);
            SUBACK << 4
        }
        #[cfg(not(test))]
        Packet::ConnAck { .. } | Packet::SubAck { .. } => {
            return Err(TransportError::Protocol(format!(
                "{} is only sent by brokers",
                packet.name()
            )))
        }
        Packet::PingReq => PINGREQ << 4,
        Packet::PingResp => PINGRESP << 4,
        Packet::Disconnect => DISCONNECT << 4,
    };

    if body.len() > MAX_REMAINING_LENGTH {
        return Err(TransportError::Protocol(format!(
            "packet too large ({} bytes, max {MAX_REMAINING_LENGTH})",
            body.len()
        )));
    }

    dst.reserve(1 + 4 + body.len());
    dst.put_u8(first_byte);
    put_remaining_length(dst, body.len());
    dst.put_slice(&body);
    Ok(())
}

/// Decode one packet from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
///
/// `TransportError::Framing` leaves the buffer untouched: the packet boundary
/// is unknown or the body is too large to buffer, so the stream is unusable.
/// `TransportError::Protocol` is only returned after the bad packet has been
/// consumed.
pub fn decode_packet(src: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>> {
    if src.is_empty() {
        return Ok(None);
    }

    let (remaining, length_bytes) = match read_remaining_length(&src[1..])? {
        Some(parsed) => parsed,
        None => return Ok(None),
    };

    if remaining > max_packet_size {
        return Err(TransportError::Framing(format!(
            "packet too large ({remaining} bytes, max {max_packet_size})"
        )));
    }

    let header_len = 1 + length_bytes;
    if src.len() < header_len + remaining {
        return Ok(None);
    }

    let first_byte = src[0];
    src.advance(header_len);
    let mut body = src.split_to(remaining).freeze();

    let packet_type = first_byte >> 4;
    let flags = first_byte & 0x0F;

    let packet = match packet_type {
        #[cfg(test)]
        CONNECT => {
            let protocol = get_string(&mut body)?;
            if protocol != PROTOCOL_NAME {
                return Err(TransportError::Protocol(format!(
                    "unsupported protocol name '{protocol}'"
                )));
            }
            let _level = get_u8(&mut body)?;
            let connect_flags = get_u8(&mut body)?;
            let keep_alive = get_u16(&mut body)?;
            let client_id = get_string(&mut body)?;
            Packet::Connect {
                client_id,
                keep_alive,
                clean_session: connect_flags & CLEAN_SESSION != 0,
            }
        }
        CONNACK => Packet::ConnAck {
            session_present: get_u8(&mut body)? & 0x01 != 0,
            return_code: get_u8(&mut body)?,
        },
        PUBLISH => {
            let qos = QoS::from_u8((flags >> 1) & 0x03).ok_or_else(|| {
                TransportError::Protocol("unsupported publish QoS".to_string())
            })?;
            let topic = get_string(&mut body)?;
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => Some(get_u16(&mut body)?),
            };
            Packet::Publish {
                topic,
                payload: body,
                qos,
                packet_id,
                dup: flags & 0x08 != 0,
                retain: flags & 0x01 != 0,
            }
        }
        PUBACK => Packet::PubAck {
            packet_id: get_u16(&mut body)?,
        },
        #[cfg(test)]
        SUBSCRIBE => {
            let packet_id = get_u16(&mut body)?;
            let mut topics = Vec::new();
            while body.has_remaining() {
                let topic = get_string(&mut body)?;
                let qos = QoS::from_u8(get_u8(&mut body)? & 0x03).ok_or_else(|| {
                    TransportError::Protocol("unsupported subscription QoS".to_string())
                })?;
                topics.push((topic, qos));
            }
            Packet::Subscribe { packet_id, topics }
        }
        SUBACK => {
            let packet_id = get_u16(&mut body)?;
            Packet::SubAck {
                packet_id,
                return_codes: body.to_vec(),
            }
        }
        PINGREQ => Packet::PingReq,
        PINGRESP => Packet::PingResp,
        DISCONNECT => Packet::Disconnect,
        other => {
            return Err(TransportError::Protocol(format!(
                "unsupported packet type {other}"
            )))
        }
    };

    Ok(Some(packet))
}

fn put_remaining_length(dst: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Returns `(length, bytes_used)`, or `None` if more bytes are needed.
fn read_remaining_length(src: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (index, byte) in src.iter().enumerate() {
        if index >= 4 {
            return Err(TransportError::Framing(
                "malformed remaining length".to_string(),
            ));
        }
        value += (*byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }
    if src.len() >= 4 {
        return Err(TransportError::Framing(
            "malformed remaining length".to_string(),
        ));
    }
    Ok(None)
}

fn put_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        TransportError::Protocol(format!("string too long ({} bytes)", value.len()))
    })?;
    dst.put_u16(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn get_u8(src: &mut Bytes) -> Result<u8> {
    if src.remaining() < 1 {
        return Err(truncated());
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut Bytes) -> Result<u16> {
    if src.remaining() < 2 {
        return Err(truncated());
    }
    Ok(src.get_u16())
}

fn get_string(src: &mut Bytes) -> Result<String> {
    let len = get_u16(src)? as usize;
    if src.remaining() < len {
        return Err(truncated());
    }
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| TransportError::Protocol("string is not valid UTF-8".to_string()))
}

fn truncated() -> TransportError {
    TransportError::Protocol("truncated packet".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        encode_packet(&packet, &mut buf).expect("encode should succeed");
        let decoded = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .expect("decode should succeed")
            .expect("packet should be complete");
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn connect_wire_layout() {
        let mut buf = BytesMut::new();
        encode_packet(
            &Packet::Connect {
                client_id: "dev-1".to_string(),
                keep_alive: 60,
                clean_session: true,
            },
            &mut buf,
        )
        .expect("encode should succeed");

        assert_eq!(buf[0], 0x10);
        assert_eq!(buf[1] as usize, buf.len() - 2);
        assert_eq!(&buf[2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
        assert_eq!(buf[8], 4);
        assert_eq!(buf[9], 0x02);
        assert_eq!(&buf[10..12], &[0x00, 60]);
    }

    #[test]
    fn qos1_publish_carries_packet_id() {
        let packet = Packet::Publish {
            topic: "SiteWhere/input/protobuf".to_string(),
            payload: Bytes::from_static(b"\x01\x02"),
            qos: QoS::AtLeastOnce,
            packet_id: Some(42),
            dup: false,
            retain: false,
        };
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn qos1_publish_without_id_is_rejected() {
        let mut buf = BytesMut::new();
        let result = encode_packet(
            &Packet::Publish {
                topic: "t".to_string(),
                payload: Bytes::new(),
                qos: QoS::AtLeastOnce,
                packet_id: None,
                dup: false,
                retain: false,
            },
            &mut buf,
        );
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }

    #[test]
    fn subscribe_sets_reserved_flags() {
        let packet = Packet::Subscribe {
            packet_id: 3,
            topics: vec![
                ("SiteWhere/system/dev-1".to_string(), QoS::AtLeastOnce),
                ("SiteWhere/commands/dev-1".to_string(), QoS::AtLeastOnce),
            ],
        };
        let mut buf = BytesMut::new();
        encode_packet(&packet, &mut buf).expect("encode should succeed");
        assert_eq!(buf[0], 0x82);
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn large_publish_uses_multibyte_length() {
        let payload = Bytes::from(vec![0xAB; 70_000]);
        let packet = Packet::Publish {
            topic: "t".to_string(),
            payload,
            qos: QoS::AtMostOnce,
            packet_id: None,
            dup: false,
            retain: false,
        };
        let mut buf = BytesMut::new();
        encode_packet(&packet, &mut buf).expect("encode should succeed");
        assert_eq!(buf[1] & 0x80, 0x80);
        assert_eq!(roundtrip(packet.clone()), packet);
    }

    #[test]
    fn incomplete_packet_needs_more_data() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::PubAck { packet_id: 9 }, &mut buf).expect("encode");
        buf.truncate(3);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE)
            .expect("partial decode is not an error")
            .is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn oversized_packet_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(PUBLISH << 4);
        put_remaining_length(&mut buf, 4096);
        let result = decode_packet(&mut buf, 1024);
        assert!(matches!(result, Err(TransportError::Framing(_))));
        assert_eq!(buf.len(), 3, "oversized packet is not consumed");
    }

    #[test]
    fn malformed_remaining_length_rejected() {
        let mut buf = BytesMut::from(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01][..]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE);
        assert!(matches!(result, Err(TransportError::Framing(_))));

        let mut buf = BytesMut::from(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE);
        assert!(matches!(result, Err(TransportError::Framing(_))));
    }

    #[test]
    fn unknown_packet_type_is_consumed() {
        let mut buf = BytesMut::from(&[0xF0, 0x00, 0xD0, 0x00][..]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE);
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert_eq!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET_SIZE).expect("next packet decodes"),
            Some(Packet::PingResp)
        );
    }

    #[test]
    fn control_packets_without_body() {
        assert_eq!(roundtrip(Packet::PingReq), Packet::PingReq);
        assert_eq!(roundtrip(Packet::PingResp), Packet::PingResp);
        assert_eq!(roundtrip(Packet::Disconnect), Packet::Disconnect);
    }

    #[test]
    fn connack_reasons() {
        assert_eq!(connack_reason(0), "accepted");
        assert_eq!(connack_reason(5), "not authorized");
        assert_eq!(connack_reason(77), "unknown return code");
    }
}
