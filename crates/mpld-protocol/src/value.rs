//! Attribute values and stream-type atoms.

use chrono::{DateTime, Utc};

/// The stream a log message originated from.
///
/// Carried on the wire as a symbolic atom (extension tag `0x01`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
    Structured,
    /// A producer-chosen label outside the well-known set.
    Other(String),
}

impl StreamType {
    /// The atom name as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            StreamType::Stdout => "stdout",
            StreamType::Stderr => "stderr",
            StreamType::Structured => "structured",
            StreamType::Other(name) => name,
        }
    }

    /// Maps an atom name back to a stream type.
    pub fn from_name(name: &str) -> Self {
        match name {
            "stdout" => StreamType::Stdout,
            "stderr" => StreamType::Stderr,
            "structured" => StreamType::Structured,
            other => StreamType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attribute value.
///
/// This is the closed set the codec can represent; producers must reject
/// anything else at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    List(Vec<AttrValue>),
    Map(AttrMap),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(ts: DateTime<Utc>) -> Self {
        AttrValue::Timestamp(ts)
    }
}

/// An insertion-ordered attribute mapping.
///
/// Order is part of the contract: the codec and the framings must see
/// attributes in the order the producer inserted them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrMap {
    entries: Vec<(String, AttrValue)>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key, replacing in place if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for AttrMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = AttrMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
