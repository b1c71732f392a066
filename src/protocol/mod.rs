// Wire message shapes
//
// Client → Server: {"<functionName>": [arg, ...]}, exactly one key
// Server → Client: {"s": <initial state>, "i": <subscriber id>} on connect
//                  {"c": [<command>, ...], "i": <invoker id>} per invocation

use crate::route::Command;
use serde::Serialize;
use serde_json::Value;

/// Client → Server: one client-function invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub function: String,
    pub args: Vec<Value>,
}

impl ClientMessage {
    /// Decode a text frame. Anything other than a single-key object whose
    /// value is an array is rejected.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let Value::Object(map) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        if map.len() != 1 {
            return Err(ProtocolError::KeyCount(map.len()));
        }

        let Some((function, args)) = map.into_iter().next() else {
            return Err(ProtocolError::KeyCount(0));
        };
        match args {
            Value::Array(args) => Ok(Self { function, args }),
            _ => Err(ProtocolError::ArgumentsNotArray(function)),
        }
    }
}

/// Malformed inbound frames. Each one is a protocol violation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message must name exactly one function, found {0} keys")]
    KeyCount(usize),
    #[error("arguments for '{0}' must be an array")]
    ArgumentsNotArray(String),
    #[error("binary frames are not supported")]
    Binary,
}

/// Server → Client: snapshot sent once when a connection is established
#[derive(Debug, Clone, Serialize)]
pub struct InitialStateMessage {
    /// Application-defined initial state
    pub s: Value,
    /// Subscriber id of the receiving connection
    pub i: u64,
}

/// Server → Client: commands produced by one invocation
#[derive(Debug, Clone, Serialize)]
pub struct CommandsMessage {
    pub c: Vec<Command>,
    /// Subscriber id of the invoking connection
    pub i: u64,
}
