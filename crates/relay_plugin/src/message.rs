use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque routing identifier attached to every message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct StreamId(pub u64);

/// "No stream assigned"
pub const INVALID_STREAM_ID: StreamId = StreamId(0);
/// Reserved for routers that want to address every stream at once.
pub const WILDCARD_STREAM_ID: StreamId = StreamId(u64::MAX);

impl StreamId {
    pub fn is_valid(&self) -> bool {
        *self != INVALID_STREAM_ID
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            INVALID_STREAM_ID => write!(f, "<invalid>"),
            WILDCARD_STREAM_ID => write!(f, "*"),
            StreamId(id) => write!(f, "{}", id),
        }
    }
}

// -----------------------------------------------------------------------------
// Metadata
// -----------------------------------------------------------------------------

/// A single metadata value. Only bytes and strings have typed accessors,
/// everything else is carried along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
}

impl MetadataValue {
    /// Name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataValue::Bytes(_) => "bytes",
            MetadataValue::String(_) => "string",
            MetadataValue::Int(_) => "int",
            MetadataValue::Float(_) => "float",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Json(_) => "json",
        }
    }

    /// Byte representation of the value. Bytes and strings are borrowed,
    /// scalars and json are stringified.
    pub fn to_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            MetadataValue::Bytes(b) => Cow::Borrowed(b.as_slice()),
            MetadataValue::String(s) => Cow::Borrowed(s.as_bytes()),
            other => Cow::Owned(other.to_string().into_bytes()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            MetadataValue::String(s) => write!(f, "{}", s),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        MetadataValue::Bytes(value)
    }
}

impl From<&[u8]> for MetadataValue {
    fn from(value: &[u8]) -> Self {
        MetadataValue::Bytes(value.to_vec())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<Value> for MetadataValue {
    fn from(value: Value) -> Self {
        MetadataValue::Json(value)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("metadata key '{key}' holds a {found} value, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Key/value metadata attached to a message. Looking up a key that is not
/// there is a miss (`None`), never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(HashMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn delete(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Raw bytes stored under `key`. Strings are returned as their UTF-8 bytes.
    pub fn bytes(&self, key: &str) -> Result<Option<&[u8]>, MetadataError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(MetadataValue::Bytes(b)) => Ok(Some(b.as_slice())),
            Some(MetadataValue::String(s)) => Ok(Some(s.as_bytes())),
            Some(other) => Err(MetadataError::TypeMismatch {
                key: key.to_string(),
                expected: "bytes",
                found: other.kind(),
            }),
        }
    }

    /// String stored under `key`. Bytes are decoded lossily.
    pub fn string(&self, key: &str) -> Result<Option<Cow<'_, str>>, MetadataError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(MetadataValue::String(s)) => Ok(Some(Cow::Borrowed(s.as_str()))),
            Some(MetadataValue::Bytes(b)) => Ok(Some(String::from_utf8_lossy(b))),
            Some(other) => Err(MetadataError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
                found: other.kind(),
            }),
        }
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// -----------------------------------------------------------------------------
// Message
// -----------------------------------------------------------------------------

/// Whatever produced a message. Messages only keep a weak reference to it.
pub trait MessageSource: Send + Sync {
    fn source_id(&self) -> String;
}

#[derive(Clone)]
pub struct Message {
    payload: Vec<u8>,
    metadata: Metadata,
    stream_id: StreamId,
    prev_stream_id: StreamId,
    created: DateTime<Utc>,
    source: Option<Weak<dyn MessageSource>>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>, metadata: Option<Metadata>, stream_id: StreamId) -> Self {
        Self {
            payload: payload.into(),
            metadata: metadata.unwrap_or_default(),
            stream_id,
            prev_stream_id: stream_id,
            created: Utc::now(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Weak<dyn MessageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn store_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn replace_metadata(&mut self, metadata: Metadata) -> Metadata {
        std::mem::replace(&mut self.metadata, metadata)
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn prev_stream_id(&self) -> StreamId {
        self.prev_stream_id
    }

    /// Move the message to another stream, remembering where it came from.
    pub fn set_stream_id(&mut self, stream_id: StreamId) {
        self.prev_stream_id = self.stream_id;
        self.stream_id = stream_id;
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The origin of this message, if it is still alive.
    pub fn source(&self) -> Option<Arc<dyn MessageSource>> {
        self.source.as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("metadata", &self.metadata)
            .field("stream_id", &self.stream_id)
            .field("prev_stream_id", &self.prev_stream_id)
            .field("created", &self.created)
            .field("source", &self.source().map(|s| s.source_id()))
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.payload))
    }
}
