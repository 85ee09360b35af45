//! Command handler abstraction and factory.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sitewhere_agent_envelope::{EnvelopeHeader, RegistrationAck, SystemCommandKind};
use tracing::warn;

use crate::config::DeviceIdentity;
use crate::dispatcher::EventDispatcher;
use crate::error::{AgentError, Result};
use crate::handlers::{BaseHandler, EchoHandler, ExampleHandler};
use crate::invocation::ArgType;
use crate::registry::{Call, OperationKey, OperationRegistry};

/// Device-specific behaviour plugged into the agent.
///
/// Implementors declare their application commands in [`operations`] and
/// may override the lifecycle hooks. Every hook runs on one thread at a
/// time: `startup` on the thread that starts the agent, the rest on the
/// inbound processing thread.
///
/// [`operations`]: CommandHandler::operations
pub trait CommandHandler: Send + 'static {
    /// Populate the operation table. Called once per instance.
    fn operations(registry: &mut OperationRegistry<Self>)
    where
        Self: Sized;

    /// Runs after the connection is up and the receive loop has started.
    fn startup(&mut self, identity: &DeviceIdentity, dispatcher: &EventDispatcher) -> Result<()> {
        let _ = (identity, dispatcher);
        Ok(())
    }

    /// Runs for every registration acknowledgement on the system channel.
    fn on_registration_ack(
        &mut self,
        header: &EnvelopeHeader<SystemCommandKind>,
        ack: &RegistrationAck,
        dispatcher: &EventDispatcher,
    ) -> Result<()> {
        let _ = (header, ack, dispatcher);
        Ok(())
    }
}

trait ErasedHandler: Send {
    fn startup(&mut self, identity: &DeviceIdentity, dispatcher: &EventDispatcher) -> Result<()>;

    fn on_registration_ack(
        &mut self,
        header: &EnvelopeHeader<SystemCommandKind>,
        ack: &RegistrationAck,
        dispatcher: &EventDispatcher,
    ) -> Result<()>;

    fn supports(&self, name: &str, signature: &[ArgType]) -> bool;

    fn call(&mut self, signature: &[ArgType], call: &Call<'_>) -> Option<Result<()>>;

    fn operation_keys(&self) -> Vec<OperationKey>;
}

struct Bound<H> {
    handler: H,
    registry: OperationRegistry<H>,
}

impl<H: CommandHandler> ErasedHandler for Bound<H> {
    fn startup(&mut self, identity: &DeviceIdentity, dispatcher: &EventDispatcher) -> Result<()> {
        self.handler.startup(identity, dispatcher)
    }

    fn on_registration_ack(
        &mut self,
        header: &EnvelopeHeader<SystemCommandKind>,
        ack: &RegistrationAck,
        dispatcher: &EventDispatcher,
    ) -> Result<()> {
        self.handler.on_registration_ack(header, ack, dispatcher)
    }

    fn supports(&self, name: &str, signature: &[ArgType]) -> bool {
        self.registry.contains(name, signature)
    }

    fn call(&mut self, signature: &[ArgType], call: &Call<'_>) -> Option<Result<()>> {
        let operation = self.registry.resolve(call.command, signature)?;
        Some(operation(&mut self.handler, call))
    }

    fn operation_keys(&self) -> Vec<OperationKey> {
        self.registry.keys().into_iter().cloned().collect()
    }
}

/// A constructed handler with its operation table, behind a uniform type.
///
/// Panics raised by handler code are caught here and surface as
/// [`AgentError::Panicked`].
pub struct HandlerInstance {
    name: String,
    inner: Box<dyn ErasedHandler>,
}

impl HandlerInstance {
    pub fn new<H: CommandHandler>(name: impl Into<String>, handler: H) -> Self {
        let mut registry = OperationRegistry::new();
        H::operations(&mut registry);
        Self {
            name: name.into(),
            inner: Box::new(Bound { handler, registry }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn startup(
        &mut self,
        identity: &DeviceIdentity,
        dispatcher: &EventDispatcher,
    ) -> Result<()> {
        let inner = &mut self.inner;
        panic::catch_unwind(AssertUnwindSafe(|| inner.startup(identity, dispatcher)))
            .unwrap_or_else(|payload| Err(self.panicked("startup", payload)))
    }

    pub fn on_registration_ack(
        &mut self,
        header: &EnvelopeHeader<SystemCommandKind>,
        ack: &RegistrationAck,
        dispatcher: &EventDispatcher,
    ) -> Result<()> {
        let inner = &mut self.inner;
        panic::catch_unwind(AssertUnwindSafe(|| {
            inner.on_registration_ack(header, ack, dispatcher)
        }))
        .unwrap_or_else(|payload| Err(self.panicked("registration ack", payload)))
    }

    pub fn supports(&self, name: &str, signature: &[ArgType]) -> bool {
        self.inner.supports(name, signature)
    }

    /// Invoke the operation registered under `(call.command, signature)`.
    ///
    /// `None` when no such operation exists.
    pub fn call(&mut self, signature: &[ArgType], call: &Call<'_>) -> Option<Result<()>> {
        let inner = &mut self.inner;
        panic::catch_unwind(AssertUnwindSafe(|| inner.call(signature, call)))
            .unwrap_or_else(|payload| Some(Err(self.panicked(call.command, payload))))
    }

    pub fn operation_keys(&self) -> Vec<OperationKey> {
        self.inner.operation_keys()
    }

    fn panicked(&self, hook: &str, payload: Box<dyn Any + Send>) -> AgentError {
        AgentError::Panicked {
            handler: self.name.clone(),
            hook: hook.to_string(),
            message: panic_message(payload.as_ref()),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInstance")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handler shared between the starting thread and the receive loop.
pub(crate) type SharedHandler = Arc<Mutex<HandlerInstance>>;

/// Lock the shared handler, recovering the guard if a previous holder panicked.
pub(crate) fn lock_handler(handler: &SharedHandler) -> MutexGuard<'_, HandlerInstance> {
    handler.lock().unwrap_or_else(|poisoned| {
        warn!("command handler lock was poisoned, continuing with its current state");
        PoisonError::into_inner(poisoned)
    })
}

type Constructor = Box<dyn Fn() -> HandlerInstance + Send + Sync>;

/// Builds handlers by identifier.
///
/// [`HandlerFactory::default`] knows the built-in handlers; embedders add
/// their own with [`register`](HandlerFactory::register).
pub struct HandlerFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl HandlerFactory {
    /// A factory with no identifiers.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A factory preloaded with `BaseHandler`, `EchoHandler` and `ExampleHandler`.
    pub fn with_builtins() -> Self {
        let mut factory = Self::empty();
        factory
            .register(BaseHandler::NAME, BaseHandler::default)
            .register(EchoHandler::NAME, EchoHandler::default)
            .register(ExampleHandler::NAME, ExampleHandler::default);
        factory
    }

    /// Register `constructor` under `identifier`, replacing any previous entry.
    pub fn register<H, F>(&mut self, identifier: &str, constructor: F) -> &mut Self
    where
        H: CommandHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let name = identifier.to_string();
        self.constructors.insert(
            identifier.to_string(),
            Box::new(move || HandlerInstance::new(name.clone(), constructor())),
        );
        self
    }

    pub fn create(&self, identifier: &str) -> Result<HandlerInstance> {
        self.constructors
            .get(identifier)
            .map(|constructor| constructor())
            .ok_or_else(|| AgentError::UnknownHandler(identifier.to_string()))
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for HandlerFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}
