//! Application command invocation records.
//!
//! The command channel does not use the envelope format. Each message is a
//! MessagePack-encoded [`InvocationRecord`]: the command name, its argument
//! values in order, and an optional originator used to correlate responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvocationError;

/// A typed argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl ArgValue {
    pub fn arg_type(&self) -> ArgType {
        match self {
            ArgValue::Bool(_) => ArgType::Bool,
            ArgValue::Int(_) => ArgType::Int,
            ArgValue::Long(_) => ArgType::Long,
            ArgValue::Float(_) => ArgType::Float,
            ArgValue::Double(_) => ArgType::Double,
            ArgValue::String(_) => ArgType::String,
            ArgValue::Bytes(_) => ArgType::Bytes,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::String(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Long(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Double(value)
    }
}

/// One slot in an operation signature.
///
/// `Originator` only ever appears last, marking operations that take the
/// correlation reference. It is distinct from `String` so a trailing string
/// argument never matches the originator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgType {
    Bool,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Originator,
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgType::Bool => "bool",
            ArgType::Int => "int",
            ArgType::Long => "long",
            ArgType::Float => "float",
            ArgType::Double => "double",
            ArgType::String => "string",
            ArgType::Bytes => "bytes",
            ArgType::Originator => "originator",
        };
        f.write_str(name)
    }
}

/// Render a signature as `string, int, originator`.
pub fn describe_signature(signature: &[ArgType]) -> String {
    signature
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A decoded application command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub command: String,
    pub arguments: Vec<ArgValue>,
    pub originator: Option<String>,
}

impl InvocationRecord {
    pub fn new(command: impl Into<String>, arguments: Vec<ArgValue>) -> Self {
        Self {
            command: command.into(),
            arguments,
            originator: None,
        }
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = Some(originator.into());
        self
    }

    /// Argument types only.
    pub fn signature(&self) -> Vec<ArgType> {
        self.arguments.iter().map(ArgValue::arg_type).collect()
    }

    /// Argument types followed by the originator slot.
    pub fn signature_with_originator(&self) -> Vec<ArgType> {
        let mut signature = self.signature();
        signature.push(ArgType::Originator);
        signature
    }

    pub fn encode(&self) -> Result<Vec<u8>, InvocationError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, InvocationError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_append_originator_last() {
        let record = InvocationRecord::new(
            "configure",
            vec![ArgValue::from("mode"), ArgValue::Int(3)],
        )
        .with_originator("cmd-1");

        assert_eq!(record.signature(), [ArgType::String, ArgType::Int]);
        assert_eq!(
            record.signature_with_originator(),
            [ArgType::String, ArgType::Int, ArgType::Originator]
        );
        assert_eq!(
            describe_signature(&record.signature_with_originator()),
            "string, int, originator"
        );
    }

    #[test]
    fn record_survives_messagepack() {
        let record = InvocationRecord::new(
            "mixed",
            vec![
                ArgValue::Bool(true),
                ArgValue::Long(-9_000_000_000),
                ArgValue::Float(1.5),
                ArgValue::Double(33.755),
                ArgValue::Bytes(vec![0, 1, 255]),
            ],
        )
        .with_originator("origin");

        let bytes = record.encode().expect("encode should succeed");
        let decoded = InvocationRecord::decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, record);
    }

    #[test]
    fn corrupt_bytes_are_decode_errors() {
        let err = InvocationRecord::decode(&[0xC1, 0x00, 0x13]).expect_err("decode should fail");
        assert!(matches!(err, InvocationError::Decode(_)));
    }

    #[test]
    fn empty_input_is_decode_error() {
        assert!(InvocationRecord::decode(&[]).is_err());
    }
}
