use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{BrokerOptions, Connector, InboundMessage, PubSubTransport, QoS, Subscription};

/// A message captured by [`MemoryTransport::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

/// In-process transport.
///
/// Records every publish and replays messages pushed with [`inject`] to the
/// blocked receiver. Disconnecting wakes the receiver with
/// `TransportError::Disconnected`.
///
/// [`inject`]: MemoryTransport::inject
pub struct MemoryTransport {
    connected: AtomicBool,
    inbound_tx: Mutex<Option<Sender<InboundMessage>>>,
    inbound_rx: Mutex<Receiver<InboundMessage>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<Subscription>>,
    acknowledged: Mutex<Vec<u16>>,
    fail_publish: AtomicBool,
    disconnects: AtomicUsize,
}

impl MemoryTransport {
    /// Create a connected transport.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            connected: AtomicBool::new(true),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(rx),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Queue a message for the next `receive` call.
    pub fn inject(&self, message: InboundMessage) -> Result<()> {
        let guard = lock(&self.inbound_tx)?;
        let tx = guard.as_ref().ok_or(TransportError::Disconnected)?;
        tx.send(message).map_err(|_| TransportError::Disconnected)
    }

    /// Queue a raw payload on a topic.
    pub fn inject_payload(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.inject(InboundMessage::new(topic, payload))
    }

    /// Snapshot of everything published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the subscriptions requested so far.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Packet ids passed to `acknowledge`.
    pub fn acknowledged(&self) -> Vec<u16> {
        self.acknowledged
            .lock()
            .map(|acks| acks.clone())
            .unwrap_or_default()
    }

    /// Make subsequent publishes fail with an I/O error.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// How many times `disconnect` has been called.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubTransport for MemoryTransport {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "publish rejected by memory transport",
            )));
        }
        lock(&self.published)?.push(PublishedMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            qos,
        });
        Ok(())
    }

    fn subscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        lock(&self.subscriptions)?.extend_from_slice(subscriptions);
        Ok(())
    }

    fn receive(&self) -> Result<InboundMessage> {
        let rx = lock(&self.inbound_rx)?;
        rx.recv().map_err(|_| TransportError::Disconnected)
    }

    fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
        if let Some(id) = message.packet_id {
            lock(&self.acknowledged)?.push(id);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            // Dropping the only sender wakes a blocked receiver.
            lock(&self.inbound_tx)?.take();
            debug!("memory transport disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out a shared [`MemoryTransport`], or refuses every connection.
#[derive(Clone)]
pub struct MemoryConnector {
    transport: Option<Arc<MemoryTransport>>,
}

impl MemoryConnector {
    /// Connector that always yields `transport`.
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// Connector that behaves like an unreachable broker.
    pub fn refusing() -> Self {
        Self { transport: None }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, options: &BrokerOptions) -> Result<Arc<dyn PubSubTransport>> {
        match &self.transport {
            Some(transport) => Ok(transport.clone()),
            None => Err(TransportError::Connect {
                address: options.address(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "memory broker refused connection",
                ),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TransportError::Protocol("memory transport lock poisoned".to_string()))
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn records_publishes() {
        let transport = MemoryTransport::new();
        transport
            .publish("out", b"payload", QoS::AtLeastOnce)
            .expect("publish should succeed");

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "out");
        assert_eq!(published[0].payload.as_ref(), b"payload");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn injected_messages_are_received_in_order() {
        let transport = MemoryTransport::new();
        transport.inject_payload("a", "one").expect("inject should succeed");
        transport.inject_payload("b", "two").expect("inject should succeed");

        let first = transport.receive().expect("first message");
        let second = transport.receive().expect("second message");
        assert_eq!((first.topic.as_str(), first.payload.as_ref()), ("a", b"one".as_ref()));
        assert_eq!((second.topic.as_str(), second.payload.as_ref()), ("b", b"two".as_ref()));
    }

    #[test]
    fn disconnect_wakes_blocked_receiver() {
        let transport = Arc::new(MemoryTransport::new());
        let receiver = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || transport.receive())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        transport.disconnect().expect("disconnect should succeed");

        let result = receiver.join().expect("receiver thread should finish");
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let transport = MemoryTransport::new();
        transport.disconnect().expect("first disconnect");
        transport.disconnect().expect("second disconnect");
        assert_eq!(transport.disconnect_count(), 2);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("out", b"x", QoS::AtLeastOnce),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn publish_failure_toggle() {
        let transport = MemoryTransport::new();
        transport.set_publish_failure(true);
        assert!(matches!(
            transport.publish("out", b"x", QoS::AtLeastOnce),
            Err(TransportError::Io(_))
        ));
        assert!(transport.published().is_empty());
    }

    #[test]
    fn refusing_connector_reports_address() {
        let err = MemoryConnector::refusing()
            .connect(&BrokerOptions::default())
            .err()
            .expect("connect should fail");
        assert!(err.to_string().contains("localhost:1883"));
    }

    #[test]
    fn acknowledge_records_packet_ids() {
        let transport = MemoryTransport::new();
        let mut message = InboundMessage::new("in", "x");
        transport.acknowledge(&message).expect("qos0 ack is a no-op");
        message.packet_id = Some(7);
        transport.acknowledge(&message).expect("qos1 ack");
        assert_eq!(transport.acknowledged(), vec![7]);
    }
}
