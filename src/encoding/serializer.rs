use super::KeyStrategy;
use crate::message::{EncodedMessage, Message, Payload};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Turns a [`Message`] into the bytes sent to the broker.
///
/// Encoders run on the caller's task for the inline strategy and on worker
/// threads for the pooled one, so they must be `Send + Sync`.
pub trait MessageEncoder: Send + Sync + 'static {
    fn encode(&self, message: &Message) -> Result<EncodedMessage>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// Byte payloads pass through untouched, JSON payloads are compacted.
    Raw,
    #[default]
    JsonCompact,
    Json,
    /// Wraps the payload with topic, key and timestamp.
    Envelope,
}

#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    format: SerializationFormat,
    key_strategy: KeyStrategy,
}

impl JsonSerializer {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            format,
            key_strategy: KeyStrategy::default(),
        }
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    fn encode_payload(&self, message: &Message, key: Option<&str>) -> Result<Bytes> {
        let encoded = match (self.format, &message.payload) {
            (SerializationFormat::Raw, Payload::Bytes(bytes)) => return Ok(bytes.clone()),
            (SerializationFormat::Raw | SerializationFormat::JsonCompact, payload) => {
                serde_json::to_vec(&json_value(payload)?)?
            }
            (SerializationFormat::Json, payload) => {
                serde_json::to_vec_pretty(&json_value(payload)?)?
            }
            (SerializationFormat::Envelope, payload) => {
                let (encoding, body) = match payload {
                    Payload::Json(value) => ("json", value.clone()),
                    Payload::Bytes(bytes) => ("base64", Value::String(STANDARD.encode(bytes))),
                };
                serde_json::to_vec(&json!({
                    "topic": message.topic,
                    "key": key,
                    "ts_ms": message.timestamp.timestamp_millis(),
                    "encoding": encoding,
                    "payload": body,
                }))?
            }
        };
        Ok(Bytes::from(encoded))
    }
}

impl MessageEncoder for JsonSerializer {
    fn encode(&self, message: &Message) -> Result<EncodedMessage> {
        let sequence = message.sequence.unwrap_or_default();
        let key = self.key_strategy.extract_key(message);
        let payload = self
            .encode_payload(message, key.as_deref())
            .map_err(|e| Error::Serialization {
                sequence,
                message: e.to_string(),
            })?;

        Ok(EncodedMessage {
            sequence,
            topic: message.topic.clone(),
            key,
            payload,
            upstream_position_info: message.upstream_position_info.clone(),
            timestamp: message.timestamp,
        })
    }
}

/// JSON formats only accept byte payloads that already hold valid JSON.
fn json_value(payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Json(value) => Ok(value.clone()),
        Payload::Bytes(bytes) => serde_json::from_slice(bytes).map_err(Into::into),
    }
}
