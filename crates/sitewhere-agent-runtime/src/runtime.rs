//! Agent lifecycle: connect, receive loop, shutdown.
//!
//! `Unconnected → Connecting → Connected → ShuttingDown → Disconnected`.
//!
//! [`Agent::start`] connects, spawns the single inbound processing thread,
//! runs the handler's startup hook and returns a [`RunningAgent`]. The
//! inbound thread processes messages strictly one at a time. It stops when
//! the transport reports a disconnect, which is also how shutdown wakes it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use sitewhere_agent_transport::{
    Connector, InboundMessage, PubSubTransport, Subscription, TransportError,
};
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, AgentSettings, ChannelBinding, DeviceIdentity, InboundChannel};
use crate::dispatcher::EventDispatcher;
use crate::error::{AgentError, Result};
use crate::handler::{lock_handler, HandlerFactory};
use crate::processor::CommandProcessor;
use crate::router::{CommandRouter, RegistrationState};

const INBOUND_THREAD_NAME: &str = "sitewhere-agent-inbound";

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentState {
    Unconnected = 0,
    Connecting = 1,
    Connected = 2,
    ShuttingDown = 3,
    Disconnected = 4,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AgentState::Unconnected,
            1 => AgentState::Connecting,
            2 => AgentState::Connected,
            3 => AgentState::ShuttingDown,
            _ => AgentState::Disconnected,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: AgentState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> AgentState {
        AgentState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: AgentState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// A configured agent that has not been started.
pub struct Agent {
    config: AgentConfig,
    factory: HandlerFactory,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            factory: HandlerFactory::default(),
        }
    }

    /// Validate `settings` and build an agent from them.
    pub fn from_settings(settings: &AgentSettings) -> Result<Self> {
        Ok(Self::new(settings.validate()?))
    }

    /// Replace the handler factory, e.g. to add custom handlers.
    pub fn with_handler_factory(mut self, factory: HandlerFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Connect and start processing.
    ///
    /// Fails without leaving anything running if the handler is unknown,
    /// the broker cannot be reached or the startup hook fails.
    pub fn start<C: Connector + ?Sized>(self, connector: &C) -> Result<RunningAgent> {
        let Agent { config, factory } = self;
        let state = Arc::new(StateCell::new(AgentState::Unconnected));

        let handler = factory.create(&config.handler)?;
        info!(handler = handler.name(), "created command handler");

        state.set(AgentState::Connecting);
        info!(broker = %config.broker.address(), "connecting to broker");
        let transport = connector.connect(&config.broker).map_err(|err| {
            state.set(AgentState::Disconnected);
            AgentError::Connection(err)
        })?;
        info!(broker = %config.broker.address(), "connected to broker");

        let dispatcher = Arc::new(EventDispatcher::new(
            transport.clone(),
            config.channels.outbound(),
        ));
        let handler = Arc::new(Mutex::new(handler));
        let registration = Arc::new(RegistrationState::default());
        let router = CommandRouter::new(handler.clone(), dispatcher.clone(), registration.clone());
        let processor =
            CommandProcessor::new(handler.clone(), dispatcher.clone(), config.identity.clone());

        let shutdown = ShutdownHandle {
            inner: Arc::new(ShutdownInner {
                transport: transport.clone(),
                state: state.clone(),
                triggered: AtomicBool::new(false),
            }),
        };

        let inbound = InboundLoop {
            transport,
            channels: config.channels.clone(),
            router,
            processor,
            state: state.clone(),
        };
        state.set(AgentState::Connected);
        let receiver = thread::Builder::new()
            .name(INBOUND_THREAD_NAME.to_string())
            .spawn(move || inbound.run())
            .map_err(|err| {
                shutdown.trigger();
                AgentError::Spawn(err)
            })?;

        let mut running = RunningAgent {
            identity: config.identity,
            channels: config.channels,
            dispatcher,
            registration,
            state,
            shutdown,
            receiver: Some(receiver),
        };

        let startup = lock_handler(&handler).startup(&running.identity, &running.dispatcher);
        if let Err(err) = startup {
            error!(error = %err, "handler startup failed");
            running.shutdown();
            return Err(err);
        }

        info!(
            hardware_id = %running.identity.hardware_id(),
            "SiteWhere agent started"
        );
        Ok(running)
    }
}

/// A started agent.
///
/// Dropping it shuts the agent down.
pub struct RunningAgent {
    identity: DeviceIdentity,
    channels: ChannelBinding,
    dispatcher: Arc<EventDispatcher>,
    registration: Arc<RegistrationState>,
    state: Arc<StateCell>,
    shutdown: ShutdownHandle,
    receiver: Option<JoinHandle<()>>,
}

impl RunningAgent {
    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_registered()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn channels(&self) -> &ChannelBinding {
        &self.channels
    }

    /// The outbound dispatcher, for publishing events from the caller's thread.
    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        self.dispatcher.clone()
    }

    /// Handle that can stop the agent from another thread or a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Disconnect and join the inbound thread. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        self.join_receiver();
    }

    /// Block until the inbound thread stops, then finish shutting down.
    ///
    /// Returns after a [`ShutdownHandle::trigger`] or when the broker drops
    /// the connection.
    pub fn wait(mut self) {
        self.join_receiver();
        self.shutdown();
    }

    fn join_receiver(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        if receiver.thread().id() == thread::current().id() {
            // Called from a handler on the inbound thread; it exits on its own.
            return;
        }
        if receiver.join().is_err() {
            error!("inbound processing thread panicked");
        }
    }
}

impl Drop for RunningAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable trigger that disconnects the agent's transport.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    transport: Arc<dyn PubSubTransport>,
    state: Arc<StateCell>,
    triggered: AtomicBool,
}

impl ShutdownHandle {
    /// Disconnect the transport. Only the first call has any effect; errors
    /// are logged.
    pub fn trigger(&self) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.set(AgentState::ShuttingDown);
        info!("shutting down agent");
        if self.inner.transport.is_connected() {
            match self.inner.transport.disconnect() {
                Ok(()) => info!("disconnected from broker"),
                Err(err) => warn!(error = %err, "error disconnecting from broker"),
            }
        }
        self.inner.state.set(AgentState::Disconnected);
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

enum ReceiveErrorDisposition {
    Stop,
    Continue,
}

/// Only a protocol error leaves the session positioned at the next packet.
fn classify_receive_error(err: &TransportError) -> ReceiveErrorDisposition {
    match err {
        TransportError::Protocol(_) => ReceiveErrorDisposition::Continue,
        _ => ReceiveErrorDisposition::Stop,
    }
}

struct InboundLoop {
    transport: Arc<dyn PubSubTransport>,
    channels: ChannelBinding,
    router: CommandRouter,
    processor: CommandProcessor,
    state: Arc<StateCell>,
}

impl InboundLoop {
    fn run(self) {
        let subscriptions = [
            Subscription::at_least_once(self.channels.inbound_system()),
            Subscription::at_least_once(self.channels.inbound_command()),
        ];
        match self.transport.subscribe(&subscriptions) {
            Ok(()) => info!(
                system = %self.channels.inbound_system(),
                command = %self.channels.inbound_command(),
                "subscribed to inbound topics"
            ),
            Err(err) if err.is_shutdown() => {
                debug!("transport closed before subscribing");
                self.finish();
                return;
            }
            Err(err) => {
                error!(error = %err, "unable to subscribe to inbound topics");
                self.finish();
                return;
            }
        }

        loop {
            let message = match self.transport.receive() {
                Ok(message) => message,
                Err(err) if err.is_shutdown() => {
                    debug!("inbound processing interrupted");
                    break;
                }
                Err(err) => match classify_receive_error(&err) {
                    ReceiveErrorDisposition::Stop => {
                        error!(error = %err, "inbound connection lost");
                        break;
                    }
                    ReceiveErrorDisposition::Continue => {
                        warn!(error = %err, "skipping unreadable inbound message");
                        continue;
                    }
                },
            };
            self.dispatch(&message);
        }

        self.finish();
    }

    fn dispatch(&self, message: &InboundMessage) {
        if let Err(err) = self.transport.acknowledge(message) {
            warn!(topic = %message.topic, error = %err, "failed to acknowledge message");
        }

        match self.channels.classify(&message.topic) {
            Some(InboundChannel::System) => {
                let outcome = self.router.handle(&message.payload);
                debug!(outcome = ?outcome, "system command processed");
            }
            Some(InboundChannel::Command) => {
                let resolution = self.processor.handle(&message.payload);
                debug!(resolution = ?resolution, "application command processed");
            }
            None => warn!(topic = %message.topic, "message for unknown topic received"),
        }
    }

    fn finish(&self) {
        if self.state.get() != AgentState::ShuttingDown {
            self.state.set(AgentState::Disconnected);
        }
        info!("inbound processing stopped");
    }
}
