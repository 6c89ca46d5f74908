//! The agent message model and its wire serializer.
//!
//! A [`Message`] is an ordered, key-unique mapping carrying a mandatory
//! `@type` discriminator plus message-specific fields. After a successful
//! unpack of an encrypted envelope a [`MessageContext`] with the sender and
//! recipient key/identity hints is attached; the context is never part of
//! the serialized form.

use std::fmt::Display;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::MessageError;

/// Base DID anchoring all protocol family identifiers.
pub const BASE_DID: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg";

/// Build a family identifier: `<base-did>;spec/<family_name>/<version>/`.
pub fn family_id(family_name: &str, version: &str) -> String {
    format!("{BASE_DID};spec/{family_name}/{version}/")
}

/// Out-of-band sender/recipient hints attached after unpacking.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContext {
    pub from_did: Option<String>,
    pub to_did: Option<String>,
    pub from_key: Option<String>,
    pub to_key: String,
}

/// An agent protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: Map<String, Value>,
    /// Populated only by envelope unpacking; `None` for plaintext and
    /// locally built messages.
    pub context: Option<MessageContext>,
}

impl Message {
    /// Wrap a field mapping, requiring a string `@type`.
    pub fn new(fields: Map<String, Value>) -> Result<Self, MessageError> {
        match fields.get("@type") {
            Some(Value::String(_)) => Ok(Self {
                fields,
                context: None,
            }),
            _ => Err(MessageError::MissingType),
        }
    }

    /// Parse wire text into a message. This is the lossless inverse of
    /// [`Message::serialize`].
    pub fn deserialize(text: &str) -> Result<Self, MessageError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Self::new(fields),
            _ => Err(MessageError::NotAnObject),
        }
    }

    /// Render the message as wire text, context excluded.
    pub fn serialize(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn msg_type(&self) -> &str {
        match self.fields.get("@type") {
            Some(Value::String(t)) => t,
            _ => unreachable!("constructors guarantee a string @type"),
        }
    }

    /// The `@id` correlation value, when present.
    pub fn id(&self) -> Option<&str> {
        self.str_field("@id")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Multi-line rendering for logs and diagnostics.
    pub fn pretty_print(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_else(|_| "<unprintable>".to_string())
    }
}

impl TryFrom<Value> for Message {
    type Error = MessageError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::new(fields),
            _ => Err(MessageError::NotAnObject),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::deserialize(deserializer)?;
        Message::new(fields).map_err(serde::de::Error::custom)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.serialize() {
            Ok(text) => write!(f, "{text}"),
            Err(_) => write!(f, "<unprintable>"),
        }
    }
}
