use crate::message::{Message, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Decides which key a message is published with.
///
/// An explicit key set on the message always wins; the strategy is only
/// consulted for messages without one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Only use the key set on the message.
    #[default]
    Message,
    /// Key every message by its topic name.
    Topic,
    /// Dotted path into a JSON payload, e.g. `user.profile.email`.
    FieldPath(String),
    /// Several JSON fields joined with `:`.
    Composite(Vec<String>),
    /// Never set a key, even if the message carries one.
    None,
}

impl KeyStrategy {
    pub fn extract_key(&self, message: &Message) -> Option<String> {
        match self {
            KeyStrategy::None => None,
            _ if message.key.is_some() => message.key.clone(),
            KeyStrategy::Message => None,
            KeyStrategy::Topic => Some(message.topic.clone()),
            KeyStrategy::FieldPath(path) => match &message.payload {
                Payload::Json(record) => extract_field_value(record, path),
                Payload::Bytes(_) => {
                    debug!("Field path key strategy needs a JSON payload");
                    None
                }
            },
            KeyStrategy::Composite(fields) => match &message.payload {
                Payload::Json(record) => extract_composite_key(record, fields),
                Payload::Bytes(_) => {
                    debug!("Composite key strategy needs a JSON payload");
                    None
                }
            },
        }
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut current = record;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(record: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(record, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for composite key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
