use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Payload carried by a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Already-encoded bytes, opaque to the producer.
    Bytes(Bytes),
    /// Structured value, encoded according to the configured format.
    Json(Value),
}

/// A message handed to [`Producer::publish`](crate::Producer::publish).
///
/// The sequence number is left unset by callers; the producer assigns it at
/// ingestion so that encoded messages can be put back in publish order.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Payload,
    pub key: Option<String>,
    /// Opaque position of this message in the caller's own source (e.g. a
    /// binlog offset). Reported back through the checkpoint position data
    /// once the message has been acknowledged.
    pub upstream_position_info: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub(crate) sequence: Option<u64>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            key: None,
            upstream_position_info: None,
            timestamp: Utc::now(),
            sequence: None,
        }
    }

    pub fn json(topic: impl Into<String>, value: Value) -> Self {
        Self::new(topic, Payload::Json(value))
    }

    pub fn bytes(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(topic, Payload::Bytes(payload.into()))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_upstream_position_info(mut self, info: Value) -> Self {
        self.upstream_position_info = Some(info);
        self
    }

    /// Sequence number assigned by the producer, `None` until published.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }
}

/// The encoded form of a [`Message`], ready to be sent to a broker.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMessage {
    pub sequence: u64,
    pub topic: String,
    pub key: Option<String>,
    pub payload: Bytes,
    pub upstream_position_info: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl EncodedMessage {
    /// Bytes this message contributes to the buffer's byte threshold.
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map_or(0, |k| k.len())
    }
}
