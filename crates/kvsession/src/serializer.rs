//! Session payload strategies and the stored record envelope.
//!
//! A stored value is a [`SessionRecord`]: the record id, the serialized
//! session payload, and the absolute expiry. The payload is produced by the
//! [`SerializationStrategy`] chosen when the store is built; the record as a
//! whole is encoded with an [`EnvelopeFormat`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SerializationError;
use crate::session::Session;

/// Caller-supplied session encoding.
pub trait SessionCodec: Send + Sync {
    fn serialize(&self, session: &Session) -> Result<Value, SerializationError>;

    fn deserialize(&self, payload: Value) -> Result<Session, SerializationError>;
}

/// How session objects become payloads.
#[derive(Clone, Default)]
pub enum SerializationStrategy {
    /// Caller-supplied codec.
    Custom(Arc<dyn SessionCodec>),
    /// The session's JSON text, stored as a string.
    Text,
    /// The session's properties as a JSON object, cookie in canonical form.
    #[default]
    Structural,
}

impl fmt::Debug for SerializationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Text => f.write_str("Text"),
            Self::Structural => f.write_str("Structural"),
        }
    }
}

/// Payload key holding the session cookie.
const COOKIE_PROPERTY: &str = "cookie";

impl SerializationStrategy {
    /// Encode a session.
    ///
    /// The built-in strategies store the cookie under `cookie`, so a session
    /// property with that name is rejected rather than lost.
    pub fn serialize(&self, session: &Session) -> Result<Value, SerializationError> {
        if !matches!(self, Self::Custom(_)) && session.data.contains_key(COOKIE_PROPERTY) {
            return Err(SerializationError::ReservedProperty(
                COOKIE_PROPERTY.to_string(),
            ));
        }

        match self {
            Self::Custom(codec) => codec.serialize(session),
            Self::Text => Ok(Value::String(serde_json::to_string(session)?)),
            Self::Structural => {
                let mut object = session.data.clone();
                if let Some(cookie) = &session.cookie {
                    object.insert(COOKIE_PROPERTY.to_string(), serde_json::to_value(cookie)?);
                }
                Ok(Value::Object(object))
            }
        }
    }

    pub fn deserialize(&self, payload: Value) -> Result<Session, SerializationError> {
        match self {
            Self::Custom(codec) => codec.deserialize(payload),
            Self::Text => match payload {
                Value::String(text) => Ok(serde_json::from_str(&text)?),
                other => Err(SerializationError::UnexpectedPayload(format!(
                    "expected session text, found {}",
                    kind(&other)
                ))),
            },
            Self::Structural => match payload {
                Value::Object(_) => Ok(serde_json::from_value(payload)?),
                other => Err(SerializationError::UnexpectedPayload(format!(
                    "expected session object, found {}",
                    kind(&other)
                ))),
            },
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The value stored under a record key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Effective session id.
    #[serde(rename = "_id")]
    pub id: String,

    /// Payload produced by the serialization strategy.
    pub session: Value,

    /// Expiry in milliseconds since the Unix epoch. Absent on legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

/// Byte encoding of a [`SessionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    Json,
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Default for EnvelopeFormat {
    fn default() -> Self {
        if cfg!(feature = "msgpack") {
            Self::MessagePack
        } else {
            Self::Json
        }
    }
}

impl fmt::Display for EnvelopeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::MessagePack => f.write_str("msgpack"),
        }
    }
}

impl EnvelopeFormat {
    /// Whether this build can encode the format.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Json => true,
            Self::MessagePack => cfg!(feature = "msgpack"),
        }
    }

    pub fn encode(&self, record: &SessionRecord) -> Result<Vec<u8>, SerializationError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(record)?),
            #[cfg(feature = "msgpack")]
            Self::MessagePack => Ok(rmp_serde::to_vec_named(record)?),
            #[cfg(not(feature = "msgpack"))]
            Self::MessagePack => Err(SerializationError::UnsupportedEnvelope(self.to_string())),
        }
    }

    /// Decode a record written in either format.
    ///
    /// A JSON record starts with `{`; a MessagePack map never does.
    pub fn decode(bytes: &[u8]) -> Result<SessionRecord, SerializationError> {
        match bytes.first() {
            None => Err(SerializationError::UnexpectedPayload(
                "empty session record".to_string(),
            )),
            Some(b'{') => Ok(serde_json::from_slice(bytes)?),
            #[cfg(feature = "msgpack")]
            Some(_) => Ok(rmp_serde::from_slice(bytes)?),
            #[cfg(not(feature = "msgpack"))]
            Some(_) => Err(SerializationError::UnsupportedEnvelope(
                Self::MessagePack.to_string(),
            )),
        }
    }
}
