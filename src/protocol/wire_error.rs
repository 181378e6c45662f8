//! # Error encoding across the channel.
//!
//! Errors never cross the process boundary as live values. Whenever a worker
//! needs to report a failure it calls one of the [`WireError`] encoders, which
//! flatten the error (and its cause chain) into `{name, message, causes}`.
//!
//! [`ProtocolError`] is the local type for malformed inbound traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error as carried on the wire.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct WireError {
    /// Error class, e.g. `RemoteTaskError`, `ProtocolError`, `Error`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl WireError {
    pub const PROTOCOL: &'static str = "ProtocolError";
    pub const REMOTE_TASK: &'static str = "RemoteTaskError";
    pub const PANIC: &'static str = "Panic";

    /// Creates an error with no causes.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Encodes any `std::error::Error`, walking its `source()` chain.
    pub fn encode(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            name: "Error".to_owned(),
            message: err.to_string(),
            causes,
        }
    }

    /// Encodes a handler failure.
    ///
    /// A `WireError` at the root of the chain is passed through unchanged so
    /// handlers can choose the error name themselves.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(wire) = err.downcast_ref::<WireError>() {
            return wire.clone();
        }
        Self {
            name: "Error".to_owned(),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }

    /// Malformed request from the other side.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(Self::PROTOCOL, message)
    }

    /// Application-level task failure raised by the runtime itself.
    pub fn remote_task(message: impl Into<String>) -> Self {
        Self::new(Self::REMOTE_TASK, message)
    }

    /// Decodes an `error` content: either an encoded error or any other JSON,
    /// in which case the JSON text becomes the message.
    pub fn from_content(content: &Value) -> Self {
        match content {
            Value::String(s) => Self::new("Error", s.clone()),
            other => Self::deserialize(other).unwrap_or_else(|_| Self::new("Error", other.to_string())),
        }
    }
}

/// Malformed or unmatched inbound traffic.
///
/// Protocol errors are logged by whoever receives them; they never resolve a
/// caller's future.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The line is not a valid envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The content does not match what its tag requires.
    #[error("malformed {kind} content: {source}")]
    Content {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The framing layer failed (line too long, I/O).
    #[error("channel framing error: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn framing_errors_convert() {
        let err = ProtocolError::from(tokio_util::codec::LinesCodecError::MaxLineLengthExceeded);
        assert!(matches!(err, ProtocolError::Framing(_)));
        assert!(err.to_string().starts_with("channel framing error"));
    }

    #[test]
    fn anyhow_context_becomes_causes() {
        let err = anyhow::anyhow!("disk full").context("writing report");
        let wire = WireError::from_anyhow(&err);
        assert_eq!(wire.message, "writing report");
        assert_eq!(wire.causes, vec!["disk full".to_string()]);
    }

    #[test]
    fn wire_error_passes_through_anyhow() {
        let err = anyhow::Error::new(WireError::new("Custom", "nope"));
        assert_eq!(WireError::from_anyhow(&err), WireError::new("Custom", "nope"));
    }

    #[test]
    fn std_error_chain_is_walked() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "pipe closed");
        let wire = WireError::encode(&io);
        assert_eq!(wire.message, "pipe closed");
        assert!(wire.causes.is_empty());
    }

    #[test]
    fn content_decoding_is_lenient() {
        assert_eq!(WireError::from_content(&json!("plain")).message, "plain");
        assert_eq!(WireError::from_content(&json!({"code": 7})).message, r#"{"code":7}"#);
        let encoded = json!({"name": "ProtocolError", "message": "bad"});
        assert_eq!(WireError::from_content(&encoded).name, "ProtocolError");
    }
}
