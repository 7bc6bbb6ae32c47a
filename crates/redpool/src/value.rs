//! Value model
//!
//! A `Value` is an immutable, possibly-null byte sequence with converters to
//! the scalar types a server reply can carry. `Hash` is the pairwise
//! interpretation of reply leaves, `PublishedValue` the decoded shape of a
//! pub/sub delivery.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use resp::CommandArg;

use crate::errors::{Error, Result};
use crate::result::ResultSet;

const NIL_TEXT: &str = "(nil)";

/// An immutable reply leaf or argument value. The distinguished null value
/// marks absent data (null bulk replies).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value(Option<Bytes>);

impl Value {
    /// The distinguished null value.
    pub fn nil() -> Value {
        Value(None)
    }

    pub fn new(data: impl Into<Bytes>) -> Value {
        Value(Some(data.into()))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_none()
    }

    /// Text form; the null value reads `(nil)`.
    pub fn to_text(&self) -> String {
        match &self.0 {
            Some(data) => String::from_utf8_lossy(data).into_owned(),
            None => NIL_TEXT.to_string(),
        }
    }

    /// True iff the text form is the server's `OK` status.
    pub fn is_ok(&self) -> bool {
        matches!(&self.0, Some(data) if data.as_ref() == b"OK")
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.scalar("bool")? {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(self.invalid_type("bool")),
        }
    }

    pub fn to_i64(&self) -> Result<i64> {
        self.scalar("i64")?
            .parse()
            .map_err(|_| self.invalid_type("i64"))
    }

    pub fn to_u64(&self) -> Result<u64> {
        self.scalar("u64")?
            .parse()
            .map_err(|_| self.invalid_type("u64"))
    }

    pub fn to_f64(&self) -> Result<f64> {
        self.scalar("f64")?
            .parse()
            .map_err(|_| self.invalid_type("f64"))
    }

    /// Splits the text form at CRLF boundaries.
    pub fn string_slice(&self) -> Vec<String> {
        self.to_text().split("\r\n").map(str::to_string).collect()
    }

    /// Splits at CRLF boundaries and interprets each line as a
    /// colon-delimited key/value pair; lines without a colon are dropped.
    pub fn string_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for line in self.string_slice() {
            if let Some((key, value)) = line.split_once(':') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        map
    }

    /// Removes the braces of a list value.
    pub fn unpack(&self) -> Value {
        match &self.0 {
            Some(data)
                if data.len() > 2 && data.first() == Some(&b'[') && data.last() == Some(&b']') =>
            {
                Value(Some(data.slice(1..data.len() - 1)))
            }
            _ => self.clone(),
        }
    }

    fn scalar(&self, target: &'static str) -> Result<&str> {
        let data = self.0.as_ref().ok_or_else(|| self.invalid_type(target))?;
        std::str::from_utf8(data).map_err(|_| self.invalid_type(target))
    }

    fn invalid_type(&self, target: &'static str) -> Error {
        Error::InvalidType {
            value: self.to_text(),
            target,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Value {
        Value(Some(data))
    }
}

impl From<&str> for Value {
    fn from(data: &str) -> Value {
        Value::new(Bytes::copy_from_slice(data.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(data: String) -> Value {
        Value::new(Bytes::from(data))
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Value {
        Value::new(Bytes::from(data))
    }
}

impl From<i64> for Value {
    fn from(data: i64) -> Value {
        Value::new(Bytes::from(data.to_string()))
    }
}

impl From<f64> for Value {
    fn from(data: f64) -> Value {
        Value::new(Bytes::from(data.to_string()))
    }
}

impl CommandArg for Value {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        out.push(Bytes::copy_from_slice(self.as_bytes()));
    }
}

/// A key and its value, from the pairwise reading of reply leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// A member value with its sorted-set score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredValue {
    pub value: Value,
    pub score: f64,
}

/// Mapping from text keys to values. Used both for decomposed replies and
/// as a command argument, where it expands to alternating key/value blobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hash {
    entries: HashMap<String, Value>,
}

impl Hash {
    pub fn new() -> Hash {
        Hash::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets a key; returns the hash for chaining.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Hash {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn string(&self, key: &str) -> Result<String> {
        Ok(self.lookup(key)?.to_text())
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        self.lookup(key)?.to_bool()
    }

    pub fn i64(&self, key: &str) -> Result<i64> {
        self.lookup(key)?.to_i64()
    }

    pub fn u64(&self, key: &str) -> Result<u64> {
        self.lookup(key)?.to_u64()
    }

    pub fn f64(&self, key: &str) -> Result<f64> {
        self.lookup(key)?.to_f64()
    }

    pub fn bytes(&self, key: &str) -> Vec<u8> {
        self.get(key).map(|v| v.as_bytes().to_vec()).unwrap_or_default()
    }

    pub fn string_slice(&self, key: &str) -> Vec<String> {
        self.get(key).map(Value::string_slice).unwrap_or_default()
    }

    pub fn string_map(&self, key: &str) -> HashMap<String, String> {
        self.get(key).map(Value::string_map).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    fn lookup(&self, key: &str) -> Result<&Value> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::InvalidKey(key.to_string()))
    }
}

impl CommandArg for Hash {
    fn append_to(&self, out: &mut Vec<Bytes>) {
        for (key, value) in &self.entries {
            out.push(Bytes::copy_from_slice(key.as_bytes()));
            out.push(Bytes::copy_from_slice(value.as_bytes()));
        }
    }
}

/// Kind tag of a pub/sub delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
    Message,
    PMessage,
}

impl PublishedKind {
    fn parse(kind: &str) -> Option<PublishedKind> {
        match kind {
            "subscribe" => Some(PublishedKind::Subscribe),
            "unsubscribe" => Some(PublishedKind::Unsubscribe),
            "psubscribe" => Some(PublishedKind::PSubscribe),
            "punsubscribe" => Some(PublishedKind::PUnsubscribe),
            "message" => Some(PublishedKind::Message),
            "pmessage" => Some(PublishedKind::PMessage),
            _ => None,
        }
    }

    /// True for payload-carrying kinds, false for subscription control acks.
    pub fn is_message(&self) -> bool {
        matches!(self, PublishedKind::Message | PublishedKind::PMessage)
    }
}

/// One delivery on a subscribed connection: either a published message or a
/// subscription control ack.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedValue {
    pub kind: PublishedKind,
    pub channel: String,
    /// Glob pattern the delivery matched; the literal `*` when the
    /// subscription was not pattern-based.
    pub pattern: String,
    /// Message payload; null for control acks.
    pub value: Value,
    /// Subscriber count for control acks; 0 for messages.
    pub count: usize,
}

impl PublishedValue {
    /// Decodes a completed reply tree. Three-element trees carry the
    /// catch-all pattern `*`; four-element trees carry an explicit pattern.
    pub(crate) fn from_result(result: &ResultSet) -> Result<PublishedValue> {
        let kind_text = result.string_at(0)?;
        let kind = PublishedKind::parse(&kind_text).ok_or_else(|| {
            Error::InvalidResponse(format!("unknown publishing kind {:?}", kind_text))
        })?;
        match (result.len(), kind) {
            (3, PublishedKind::Message) => Ok(PublishedValue {
                kind,
                channel: result.string_at(1)?,
                pattern: "*".to_string(),
                value: result.value_at(2)?.clone(),
                count: 0,
            }),
            (4, PublishedKind::PMessage) => Ok(PublishedValue {
                kind,
                pattern: result.string_at(1)?,
                channel: result.string_at(2)?,
                value: result.value_at(3)?.clone(),
                count: 0,
            }),
            (
                3,
                PublishedKind::Subscribe
                | PublishedKind::Unsubscribe
                | PublishedKind::PSubscribe
                | PublishedKind::PUnsubscribe,
            ) => Ok(PublishedValue {
                kind,
                channel: result.string_at(1)?,
                pattern: "*".to_string(),
                value: Value::nil(),
                count: result.value_at(2)?.to_u64()? as usize,
            }),
            _ => Err(Error::InvalidResponse(format!(
                "unexpected publishing shape: {}",
                result
            ))),
        }
    }
}
