use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::packet::{
    connack_reason, decode_packet, encode_packet, Packet, DEFAULT_MAX_PACKET_SIZE, SUBACK_FAILURE,
};
use crate::traits::{BrokerOptions, Connector, InboundMessage, PubSubTransport, QoS, Subscription};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;
const MIN_KEEP_ALIVE_POLL: Duration = Duration::from_millis(50);

/// Reads complete MQTT packets from the broker socket.
struct PacketReader {
    stream: TcpStream,
    buf: BytesMut,
    /// Publishes that arrived while waiting for a SUBACK.
    pending: VecDeque<InboundMessage>,
}

impl PacketReader {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            pending: VecDeque::new(),
        }
    }

    /// Read the next complete packet (blocking, honours the socket read timeout).
    ///
    /// Returns `Err(TransportError::Disconnected)` when EOF is reached.
    fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, DEFAULT_MAX_PACKET_SIZE)? {
                trace!(packet = packet.name(), "received mqtt packet");
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                return Err(TransportError::Disconnected);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

struct PacketWriter {
    stream: TcpStream,
    last_write: Instant,
}

/// Blocking MQTT 3.1.1 client session.
///
/// Reader and writer sit behind separate locks over cloned sockets, so a
/// publish from the caller's thread never waits on a receive blocked in the
/// background. A PINGREQ goes out whenever nothing has been written for a
/// keep-alive interval, however busy the inbound side is.
pub struct MqttClient {
    reader: Mutex<PacketReader>,
    writer: Mutex<PacketWriter>,
    connected: AtomicBool,
    next_packet_id: AtomicU16,
    keep_alive: Option<Duration>,
    address: String,
}

impl MqttClient {
    /// Open a TCP connection and complete the CONNECT/CONNACK handshake.
    pub fn connect(options: &BrokerOptions) -> Result<Self> {
        let address = options.address();
        info!(%address, client_id = %options.client_id, "connecting to mqtt broker");

        let mut stream = open_stream(options)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(options.connect_timeout))?;
        stream.set_write_timeout(Some(options.connect_timeout))?;

        let keep_alive = options
            .keep_alive
            .map(|interval| u16::try_from(interval.as_secs()).unwrap_or(u16::MAX))
            .unwrap_or(0);

        let mut buf = BytesMut::new();
        encode_packet(
            &Packet::Connect {
                client_id: options.client_id.clone(),
                keep_alive,
                clean_session: true,
            },
            &mut buf,
        )?;
        stream
            .write_all(&buf)
            .map_err(|err| TransportError::Handshake(format!("sending CONNECT failed: {err}")))?;

        let mut reader = PacketReader::new(stream.try_clone()?);
        match reader.read_packet() {
            Ok(Packet::ConnAck { return_code: 0, .. }) => {}
            Ok(Packet::ConnAck { return_code, .. }) => {
                return Err(TransportError::Handshake(format!(
                    "broker refused connection: {} ({return_code})",
                    connack_reason(return_code)
                )));
            }
            Ok(other) => {
                return Err(TransportError::Handshake(format!(
                    "expected CONNACK, got {}",
                    other.name()
                )));
            }
            Err(err) => {
                return Err(TransportError::Handshake(format!(
                    "no CONNACK from broker: {err}"
                )));
            }
        }

        // Reads wake up several times per interval so a ping is never late.
        let keep_alive = options.keep_alive.filter(|interval| !interval.is_zero());
        stream.set_read_timeout(keep_alive.map(keep_alive_poll))?;
        stream.set_write_timeout(None)?;

        info!(%address, "connected to mqtt broker");

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(PacketWriter {
                stream,
                last_write: Instant::now(),
            }),
            connected: AtomicBool::new(true),
            next_packet_id: AtomicU16::new(1),
            keep_alive,
            address,
        })
    }

    /// Broker address this session is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_packet(packet, &mut buf)?;
        let mut writer = lock(&self.writer)?;
        writer.stream.write_all(&buf)?;
        writer.stream.flush()?;
        writer.last_write = Instant::now();
        trace!(packet = packet.name(), "sent mqtt packet");
        Ok(())
    }

    fn ping_if_due(&self) -> Result<()> {
        let Some(keep_alive) = self.keep_alive else {
            return Ok(());
        };
        let idle = lock(&self.writer)?.last_write.elapsed();
        if idle + keep_alive_poll(keep_alive) >= keep_alive {
            trace!(idle_ms = idle.as_millis() as u64, "keep-alive due, sending PINGREQ");
            self.write_packet(&Packet::PingReq)?;
        }
        Ok(())
    }

    /// Next packet from the broker, pinging whenever keep-alive is due.
    fn next_packet(&self, reader: &mut PacketReader) -> Result<Packet> {
        loop {
            if !self.is_connected() {
                return Err(TransportError::Disconnected);
            }
            if let Err(err) = self.ping_if_due() {
                return Err(self.session_lost(err));
            }
            match reader.read_packet() {
                Ok(packet) => return Ok(packet),
                Err(TransportError::Io(err)) if is_read_timeout(&err) => {}
                Err(err @ TransportError::Protocol(_)) => return Err(err),
                Err(err) => return Err(self.session_lost(err)),
            }
        }
    }

    /// Mark the session dead after an error the stream cannot recover from.
    fn session_lost(&self, err: TransportError) -> TransportError {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return TransportError::Disconnected;
        }
        warn!(address = %self.address, error = %err, "mqtt connection lost");
        if let Ok(writer) = lock(&self.writer) {
            // Best effort; the broker may already be gone.
            let _ = writer.stream.shutdown(Shutdown::Both);
        }
        err
    }
}

impl PubSubTransport for MqttClient {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.packet_id()),
        };
        self.write_packet(&Packet::Publish {
            topic: topic.to_string(),
            payload: bytes::Bytes::copy_from_slice(payload),
            qos,
            packet_id,
            dup: false,
            retain: false,
        })?;
        debug!(%topic, size = payload.len(), ?packet_id, "published");
        Ok(())
    }

    fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let packet_id = self.packet_id();
        self.write_packet(&Packet::Subscribe {
            packet_id,
            topics: subscriptions
                .iter()
                .map(|sub| (sub.topic.clone(), sub.qos))
                .collect(),
        })?;

        let mut reader = lock(&self.reader)?;
        loop {
            match self.next_packet(&mut reader)? {
                Packet::SubAck {
                    packet_id: acked,
                    return_codes,
                } if acked == packet_id => {
                    let refused = return_codes.iter().position(|code| *code == SUBACK_FAILURE);
                    if let Some(index) = refused {
                        let topic = subscriptions
                            .get(index)
                            .map(|sub| sub.topic.clone())
                            .unwrap_or_default();
                        return Err(TransportError::SubscriptionRefused { topic });
                    }
                    for sub in subscriptions {
                        info!(topic = %sub.topic, qos = ?sub.qos, "subscribed");
                    }
                    return Ok(());
                }
                Packet::Publish {
                    topic,
                    payload,
                    qos,
                    packet_id,
                    ..
                } => reader.pending.push_back(InboundMessage {
                    topic,
                    payload,
                    qos,
                    packet_id,
                }),
                other => trace!(packet = other.name(), "ignored while awaiting SUBACK"),
            }
        }
    }

    fn receive(&self) -> Result<InboundMessage> {
        let mut reader = lock(&self.reader)?;
        if let Some(message) = reader.pending.pop_front() {
            return Ok(message);
        }
        loop {
            match self.next_packet(&mut reader)? {
                Packet::Publish {
                    topic,
                    payload,
                    qos,
                    packet_id,
                    ..
                } => {
                    return Ok(InboundMessage {
                        topic,
                        payload,
                        qos,
                        packet_id,
                    })
                }
                Packet::PubAck { packet_id } => trace!(packet_id, "publish acknowledged"),
                Packet::PingResp => trace!("pong"),
                other => debug!(packet = other.name(), "ignoring unexpected packet"),
            }
        }
    }

    fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
        match (message.qos, message.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.write_packet(&Packet::PubAck { packet_id })
            }
            _ => Ok(()),
        }
    }

    fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        encode_packet(&Packet::Disconnect, &mut buf)?;
        let mut writer = lock(&self.writer)?;
        let sent = writer
            .stream
            .write_all(&buf)
            .and_then(|()| writer.stream.flush());
        // Shutting the socket down also unblocks the reader clone.
        match writer.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotConnected => {}
            Err(err) => return Err(TransportError::Io(err)),
        }
        sent?;
        info!(address = %self.address, "disconnected from mqtt broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Opens [`MqttClient`] sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    fn connect(&self, options: &BrokerOptions) -> Result<Arc<dyn PubSubTransport>> {
        let client = MqttClient::connect(options)?;
        Ok(Arc::new(client))
    }
}

fn open_stream(options: &BrokerOptions) -> Result<TcpStream> {
    let address = options.address();
    let addrs = (options.hostname.as_str(), options.port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            address: address.clone(),
            source,
        })?;

    let mut last_err = std::io::Error::new(
        ErrorKind::AddrNotAvailable,
        "hostname resolved to no addresses",
    );
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, options.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = err;
            }
        }
    }
    Err(TransportError::Connect {
        address,
        source: last_err,
    })
}

fn is_read_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn keep_alive_poll(keep_alive: Duration) -> Duration {
    (keep_alive / 4).max(MIN_KEEP_ALIVE_POLL)
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TransportError::Protocol("mqtt session lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use bytes::Bytes;

    use super::*;

    struct ScriptedBroker {
        stream: TcpStream,
        buf: BytesMut,
    }

    impl ScriptedBroker {
        fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().expect("broker should accept");
            Self {
                stream,
                buf: BytesMut::new(),
            }
        }

        fn read(&mut self) -> Packet {
            loop {
                if let Some(packet) =
                    decode_packet(&mut self.buf, DEFAULT_MAX_PACKET_SIZE).expect("valid packet")
                {
                    return packet;
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).expect("broker read");
                assert!(n > 0, "client closed connection unexpectedly");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        fn send(&mut self, packet: Packet) {
            let mut buf = BytesMut::new();
            encode_packet(&packet, &mut buf).expect("encode");
            self.stream.write_all(&buf).expect("broker write");
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).expect("broker write");
        }

        fn publish_qos0(&mut self, topic: &str, payload: &'static [u8]) {
            self.send(Packet::Publish {
                topic: topic.to_string(),
                payload: Bytes::from_static(payload),
                qos: QoS::AtMostOnce,
                packet_id: None,
                dup: false,
                retain: false,
            });
        }

        /// Block until the client closes its side of the connection.
        fn wait_for_close(&mut self) {
            let mut chunk = [0u8; 1024];
            while matches!(self.stream.read(&mut chunk), Ok(n) if n > 0) {}
        }

        fn handshake(&mut self) -> String {
            match self.read() {
                Packet::Connect { client_id, .. } => {
                    self.send(Packet::ConnAck {
                        session_present: false,
                        return_code: 0,
                    });
                    client_id
                }
                other => panic!("expected CONNECT, got {other:?}"),
            }
        }
    }

    fn local_broker() -> (TcpListener, BrokerOptions) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        let options = BrokerOptions {
            hostname: "127.0.0.1".to_string(),
            port,
            client_id: "dev-1".to_string(),
            keep_alive: None,
            connect_timeout: Duration::from_secs(2),
        };
        (listener, options)
    }

    #[test]
    fn connect_and_publish_at_least_once() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            let client_id = broker.handshake();
            let publish = broker.read();
            (client_id, publish)
        });

        let client = MqttClient::connect(&options).expect("client should connect");
        client
            .publish("SiteWhere/input/protobuf", b"event", QoS::AtLeastOnce)
            .expect("publish should succeed");

        let (client_id, publish) = broker.join().expect("broker thread");
        assert_eq!(client_id, "dev-1");
        match publish {
            Packet::Publish {
                topic,
                payload,
                qos,
                packet_id,
                ..
            } => {
                assert_eq!(topic, "SiteWhere/input/protobuf");
                assert_eq!(payload.as_ref(), b"event");
                assert_eq!(qos, QoS::AtLeastOnce);
                assert!(packet_id.is_some());
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    #[test]
    fn refused_connack_is_handshake_error() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            let _ = broker.read();
            broker.send(Packet::ConnAck {
                session_present: false,
                return_code: 5,
            });
        });

        let err = MqttClient::connect(&options).expect_err("connect should fail");
        assert!(matches!(
            err,
            TransportError::Handshake(ref msg) if msg.contains("not authorized")
        ));
        broker.join().expect("broker thread");
    }

    #[test]
    fn unreachable_broker_is_connect_error() {
        let (listener, options) = local_broker();
        drop(listener);

        let err = MqttClient::connect(&options).expect_err("connect should fail");
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn subscribe_buffers_early_publish_and_acknowledges() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            broker.handshake();
            let packet_id = match broker.read() {
                Packet::Subscribe { packet_id, topics } => {
                    assert_eq!(topics.len(), 2);
                    packet_id
                }
                other => panic!("expected SUBSCRIBE, got {other:?}"),
            };
            broker.send(Packet::Publish {
                topic: "SiteWhere/system/dev-1".to_string(),
                payload: Bytes::from_static(b"early"),
                qos: QoS::AtLeastOnce,
                packet_id: Some(11),
                dup: false,
                retain: false,
            });
            broker.send(Packet::SubAck {
                packet_id,
                return_codes: vec![1, 1],
            });
            broker.read()
        });

        let client = MqttClient::connect(&options).expect("client should connect");
        client
            .subscribe(&[
                Subscription::at_least_once("SiteWhere/system/dev-1"),
                Subscription::at_least_once("SiteWhere/commands/dev-1"),
            ])
            .expect("subscribe should succeed");

        let message = client.receive().expect("buffered publish");
        assert_eq!(message.topic, "SiteWhere/system/dev-1");
        assert_eq!(message.payload.as_ref(), b"early");
        client.acknowledge(&message).expect("ack should succeed");

        let ack = broker.join().expect("broker thread");
        assert_eq!(ack, Packet::PubAck { packet_id: 11 });
    }

    #[test]
    fn refused_subscription_names_topic() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            broker.handshake();
            if let Packet::Subscribe { packet_id, .. } = broker.read() {
                broker.send(Packet::SubAck {
                    packet_id,
                    return_codes: vec![1, SUBACK_FAILURE],
                });
            }
        });

        let client = MqttClient::connect(&options).expect("client should connect");
        let err = client
            .subscribe(&[
                Subscription::at_least_once("a"),
                Subscription::at_least_once("b"),
            ])
            .expect_err("subscribe should fail");
        assert!(matches!(err, TransportError::SubscriptionRefused { ref topic } if topic == "b"));
        broker.join().expect("broker thread");
    }

    #[test]
    fn disconnect_unblocks_receiver_and_is_idempotent() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            broker.handshake();
            broker.read()
        });

        let client = Arc::new(MqttClient::connect(&options).expect("client should connect"));
        let receiver = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.receive())
        };

        thread::sleep(Duration::from_millis(50));
        client.disconnect().expect("first disconnect");
        client.disconnect().expect("second disconnect");

        let result = receiver.join().expect("receiver thread");
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert_eq!(broker.join().expect("broker thread"), Packet::Disconnect);
        assert!(!client.is_connected());
    }

    #[test]
    fn oversized_frame_closes_session() {
        let (listener, options) = local_broker();

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            broker.handshake();
            // PUBLISH announcing an 18 MiB body, then a well-formed one.
            broker.send_raw(&[0x30, 0x80, 0x80, 0x80, 0x09]);
            broker.publish_qos0("SiteWhere/commands/dev-1", b"after");
            broker.wait_for_close();
        });

        let client = MqttClient::connect(&options).expect("client should connect");
        let err = client.receive().expect_err("oversized frame should fail");
        assert!(matches!(err, TransportError::Framing(_)), "got {err:?}");
        assert!(!client.is_connected());
        assert!(matches!(client.receive(), Err(TransportError::Disconnected)));

        broker.join().expect("broker thread");
    }

    #[test]
    fn keep_alive_pings_while_inbound_traffic_flows() {
        let (listener, mut options) = local_broker();
        options.keep_alive = Some(Duration::from_secs(1));

        let broker = thread::spawn(move || {
            let mut broker = ScriptedBroker::accept(&listener);
            broker.handshake();
            for _ in 0..12 {
                broker.publish_qos0("SiteWhere/commands/dev-1", b"tick");
                thread::sleep(Duration::from_millis(200));
            }
            broker.read()
        });

        let client = MqttClient::connect(&options).expect("client should connect");
        for _ in 0..12 {
            let message = client.receive().expect("publish should arrive");
            assert_eq!(message.payload.as_ref(), b"tick");
        }

        assert_eq!(broker.join().expect("broker thread"), Packet::PingReq);
        assert!(client.is_connected());
    }
}
