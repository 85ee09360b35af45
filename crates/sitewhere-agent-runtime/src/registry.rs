//! Operation registry for command handlers.
//!
//! A handler declares its operations once, when it is constructed, by
//! registering a closure per `(name, signature)` pair. Inbound commands are
//! resolved against this table; nothing is looked up by reflection.

use std::collections::HashMap;

use crate::config::DeviceIdentity;
use crate::dispatcher::EventDispatcher;
use crate::error::{InvocationError, Result};
use crate::invocation::{ArgType, ArgValue};

/// Registry key: operation name plus exact argument signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub name: String,
    pub signature: Vec<ArgType>,
}

type Operation<H> = Box<dyn Fn(&mut H, &Call<'_>) -> Result<()> + Send>;

/// Operations available on a handler of type `H`.
pub struct OperationRegistry<H> {
    operations: HashMap<OperationKey, Operation<H>>,
}

impl<H> OperationRegistry<H> {
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Register an operation that does not take the originator.
    pub fn register<F>(&mut self, name: &str, params: &[ArgType], operation: F) -> &mut Self
    where
        F: Fn(&mut H, &Call<'_>) -> Result<()> + Send + 'static,
    {
        self.insert(name, params.to_vec(), operation)
    }

    /// Register an operation whose final parameter is the originator.
    pub fn register_with_originator<F>(
        &mut self,
        name: &str,
        params: &[ArgType],
        operation: F,
    ) -> &mut Self
    where
        F: Fn(&mut H, &Call<'_>) -> Result<()> + Send + 'static,
    {
        let mut signature = params.to_vec();
        signature.push(ArgType::Originator);
        self.insert(name, signature, operation)
    }

    fn insert<F>(&mut self, name: &str, signature: Vec<ArgType>, operation: F) -> &mut Self
    where
        F: Fn(&mut H, &Call<'_>) -> Result<()> + Send + 'static,
    {
        let key = OperationKey {
            name: name.to_string(),
            signature,
        };
        self.operations.insert(key, Box::new(operation));
        self
    }

    pub fn contains(&self, name: &str, signature: &[ArgType]) -> bool {
        self.resolve(name, signature).is_some()
    }

    pub(crate) fn resolve(&self, name: &str, signature: &[ArgType]) -> Option<&Operation<H>> {
        let key = OperationKey {
            name: name.to_string(),
            signature: signature.to_vec(),
        };
        self.operations.get(&key)
    }

    /// Registered keys, sorted by name then signature.
    pub fn keys(&self) -> Vec<&OperationKey> {
        let mut keys: Vec<_> = self.operations.keys().collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.signature.cmp(&b.signature)));
        keys
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<H> Default for OperationRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments and context for one operation call.
///
/// `originator` is `Some` only when the originator-aware signature matched.
pub struct Call<'a> {
    pub command: &'a str,
    pub args: &'a [ArgValue],
    pub originator: Option<&'a str>,
    pub identity: &'a DeviceIdentity,
    pub dispatcher: &'a EventDispatcher,
}

impl<'a> Call<'a> {
    pub fn hardware_id(&self) -> &'a str {
        self.identity.hardware_id()
    }

    pub fn arg(&self, index: usize) -> Result<&'a ArgValue> {
        self.args.get(index).ok_or_else(|| {
            InvocationError::MissingArgument {
                command: self.command.to_string(),
                index,
            }
            .into()
        })
    }

    pub fn string(&self, index: usize) -> Result<&'a str> {
        match self.arg(index)? {
            ArgValue::String(value) => Ok(value),
            other => Err(self.mismatch(index, ArgType::String, other)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i32> {
        match self.arg(index)? {
            ArgValue::Int(value) => Ok(*value),
            other => Err(self.mismatch(index, ArgType::Int, other)),
        }
    }

    pub fn long(&self, index: usize) -> Result<i64> {
        match self.arg(index)? {
            ArgValue::Long(value) => Ok(*value),
            other => Err(self.mismatch(index, ArgType::Long, other)),
        }
    }

    pub fn double(&self, index: usize) -> Result<f64> {
        match self.arg(index)? {
            ArgValue::Double(value) => Ok(*value),
            other => Err(self.mismatch(index, ArgType::Double, other)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        match self.arg(index)? {
            ArgValue::Bool(value) => Ok(*value),
            other => Err(self.mismatch(index, ArgType::Bool, other)),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<&'a [u8]> {
        match self.arg(index)? {
            ArgValue::Bytes(value) => Ok(value),
            other => Err(self.mismatch(index, ArgType::Bytes, other)),
        }
    }

    fn mismatch(&self, index: usize, expected: ArgType, actual: &ArgValue) -> crate::AgentError {
        InvocationError::ArgumentType {
            command: self.command.to_string(),
            index,
            expected,
            actual: actual.arg_type(),
        }
        .into()
    }
}
