//! # Message envelope and typed contents.
//!
//! The envelope is deliberately loose (`content` is raw JSON) so that a
//! receiver can always read the tag, and then decode the content for that tag
//! with [`Envelope::decode`]. A content that does not match its tag is a
//! [`ProtocolError`], not a transport failure.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::wire_error::{ProtocolError, WireError};

/// Tag of an [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Worker → parent handshake, content is the lineage id.
    Id,
    /// Worker → parent diagnostic line.
    Log,
    /// Worker → parent error report.
    Error,
    /// Metrics request (parent → worker) or reply (worker → parent).
    Metrics,
    /// Parent → worker initial payload.
    Data,
    /// Task request (parent → worker) or reply (worker → parent).
    Task,
    /// Parent → worker termination request.
    Kill,
}

impl MessageType {
    /// Returns the wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Id => "id",
            MessageType::Log => "log",
            MessageType::Error => "error",
            MessageType::Metrics => "metrics",
            MessageType::Data => "data",
            MessageType::Task => "task",
            MessageType::Kill => "kill",
        }
    }
}

/// One message on the channel: `{"type": <tag>, "content": <json>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Tag-dependent content.
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    /// Creates an envelope from a tag and raw content.
    pub fn new(kind: MessageType, content: Value) -> Self {
        Self { kind, content }
    }

    /// Handshake carrying the lineage id.
    pub fn id(lineage: &str) -> Self {
        Self::new(MessageType::Id, Value::String(lineage.to_owned()))
    }

    /// Initial payload pushed after a successful handshake.
    pub fn data(payload: Value) -> Self {
        Self::new(MessageType::Data, payload)
    }

    /// Termination request; the content is ignored by the worker.
    pub fn kill() -> Self {
        Self::new(MessageType::Kill, Value::Null)
    }

    /// Diagnostic line at the given level.
    pub fn log(record: &LogRecord) -> Self {
        Self::new(MessageType::Log, to_content(record))
    }

    /// Error report (already encoded).
    pub fn error(error: &WireError) -> Self {
        Self::new(MessageType::Error, to_content(error))
    }

    pub fn task_request(request: &TaskRequest) -> Self {
        Self::new(MessageType::Task, to_content(request))
    }

    pub fn task_reply(reply: &TaskReply) -> Self {
        Self::new(MessageType::Task, to_content(reply))
    }

    pub fn metrics_request(request: &MetricsRequest) -> Self {
        Self::new(MessageType::Metrics, to_content(request))
    }

    pub fn metrics_reply(reply: &MetricsReply) -> Self {
        Self::new(MessageType::Metrics, to_content(reply))
    }

    /// Decodes the content into the type expected for this tag.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.content).map_err(|source| ProtocolError::Content {
            kind: self.kind.as_str(),
            source,
        })
    }

    /// Best-effort lookup of a string field in an object content.
    ///
    /// Used to recover a correlation id from content that failed to decode.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.content.get(field).and_then(Value::as_str)
    }
}

// Contents are string-keyed structs; serialization cannot fail.
fn to_content<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Parent → worker task request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Registered handler name.
    pub task: String,
    /// Correlation id, unique among outstanding requests.
    pub identifier: String,
    /// Opaque arguments passed to the handler.
    pub args: Value,
}

/// Worker → parent task reply. Exactly one of `result` / `error` is meaningful;
/// when `error` is absent the reply is a success (a missing `result` is `null`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskReply {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl TaskReply {
    pub fn ok(identifier: impl Into<String>, result: Value) -> Self {
        Self {
            identifier: identifier.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(identifier: impl Into<String>, error: WireError) -> Self {
        Self {
            identifier: identifier.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Collapses the reply into a `Result`.
    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Parent → worker metrics request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsRequest {
    pub identifier: String,
    #[serde(default)]
    pub description: Value,
}

/// Worker → parent metrics reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsReply {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl MetricsReply {
    pub fn ok(identifier: impl Into<String>, metrics: Value) -> Self {
        Self {
            identifier: identifier.into(),
            metrics: Some(metrics),
            error: None,
        }
    }

    pub fn err(identifier: impl Into<String>, error: WireError) -> Self {
        Self {
            identifier: identifier.into(),
            metrics: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.metrics.unwrap_or(Value::Null)),
        }
    }
}

/// Worker → parent diagnostic line.
///
/// `level` is kept as a string: the parent logs unknown levels at `info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
        }
    }

    /// Decodes a `log` content. A bare string is accepted as an `info` line.
    pub fn from_content(content: &Value) -> Result<Self, serde_json::Error> {
        match content {
            Value::String(s) => Ok(Self::new("info", s.clone())),
            other => Self::deserialize(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_type_and_content_keys() {
        let env = Envelope::id("abc");
        let raw = serde_json::to_value(&env).unwrap();
        assert_eq!(raw, json!({"type": "id", "content": "abc"}));
    }

    #[test]
    fn missing_content_defaults_to_null() {
        let env: Envelope = serde_json::from_str(r#"{"type":"kill"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Kill);
        assert_eq!(env.content, Value::Null);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let res = serde_json::from_str::<Envelope>(r#"{"type":"bogus","content":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn task_request_requires_all_fields() {
        let env = Envelope::new(MessageType::Task, json!({"task": "echo", "identifier": "1"}));
        let err = env.decode::<TaskRequest>().unwrap_err();
        assert!(err.to_string().contains("task"));
        assert_eq!(env.str_field("identifier"), Some("1"));
    }

    #[test]
    fn reply_without_error_is_success_even_with_null_result() {
        let reply: TaskReply = serde_json::from_value(json!({"identifier": "x", "result": null})).unwrap();
        assert_eq!(reply.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn reply_with_error_is_failure() {
        let env = Envelope::task_reply(&TaskReply::err("x", WireError::new("Boom", "it broke")));
        let reply: TaskReply = env.decode().unwrap();
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.name, "Boom");
        assert_eq!(err.message, "it broke");
    }

    #[test]
    fn bare_string_log_is_info() {
        let rec = LogRecord::from_content(&json!("hello")).unwrap();
        assert_eq!(rec, LogRecord::new("info", "hello"));
    }
}
