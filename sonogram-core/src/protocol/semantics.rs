//! Structured meaning attached to a recognized utterance.
//!
//! ## Wire form
//!
//! | Value | JSON |
//! |-------|------|
//! | `Scalar(Text("insert"))` | `"insert"` |
//! | `Object([("action", "insert"), ("target", "foo")])` | `{"action":"insert","target":"foo"}` |
//! | `Object([])` | `null` |
//!
//! A node is either a scalar or a mapping, never both. Mapping order is
//! insertion order and is kept on the wire.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Leaf value of a semantic tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

/// Recursive semantic tree: a scalar, or an ordered mapping of named children.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticValue {
    Scalar(Scalar),
    Object(Vec<(String, SemanticValue)>),
}

impl Default for SemanticValue {
    fn default() -> Self {
        SemanticValue::Scalar(Scalar::Null)
    }
}

impl SemanticValue {
    /// An empty mapping, ready for [`SemanticValue::with`].
    pub fn object() -> Self {
        SemanticValue::Object(Vec::new())
    }

    /// A text leaf.
    pub fn text(value: impl Into<String>) -> Self {
        SemanticValue::Scalar(Scalar::Text(value.into()))
    }

    /// Builder form of [`SemanticValue::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<SemanticValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key` to `value`, replacing an existing entry in place.
    ///
    /// A scalar node becomes a mapping: the two forms are exclusive, so the
    /// scalar is discarded.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SemanticValue>) {
        let key = key.into();
        let value = value.into();
        let entries = self.entries_mut();
        match entries.iter().position(|(k, _)| *k == key) {
            Some(i) => entries[i].1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Set a nested entry, creating intermediate mappings along `path`.
    ///
    /// An empty path replaces the node itself.
    pub fn insert_path(&mut self, path: &[&str], value: SemanticValue) {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return;
        };
        let entries = self.entries_mut();
        let index = match entries.iter().position(|(k, _)| k == first) {
            Some(i) => i,
            None => {
                entries.push(((*first).to_string(), SemanticValue::default()));
                entries.len() - 1
            }
        };
        entries[index].1.insert_path(rest, value);
    }

    /// Child entry by key. Scalars have no children.
    pub fn get(&self, key: &str) -> Option<&SemanticValue> {
        match self {
            SemanticValue::Object(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            SemanticValue::Scalar(_) => None,
        }
    }

    /// The text of a text leaf.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SemanticValue::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Number of child entries (zero for scalars).
    pub fn len(&self) -> usize {
        match self {
            SemanticValue::Object(entries) => entries.len(),
            SemanticValue::Scalar(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries_mut(&mut self) -> &mut Vec<(String, SemanticValue)> {
        if let SemanticValue::Scalar(_) = self {
            *self = SemanticValue::Object(Vec::new());
        }
        match self {
            SemanticValue::Object(entries) => entries,
            SemanticValue::Scalar(_) => unreachable!("scalar replaced by object above"),
        }
    }
}

impl From<&str> for SemanticValue {
    fn from(value: &str) -> Self {
        SemanticValue::text(value)
    }
}

impl From<String> for SemanticValue {
    fn from(value: String) -> Self {
        SemanticValue::text(value)
    }
}

impl From<bool> for SemanticValue {
    fn from(value: bool) -> Self {
        SemanticValue::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for SemanticValue {
    fn from(value: i64) -> Self {
        SemanticValue::Scalar(Scalar::Number(value.into()))
    }
}

impl Serialize for SemanticValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SemanticValue::Scalar(scalar) => scalar.serialize(serializer),
            SemanticValue::Object(entries) if entries.is_empty() => serializer.serialize_unit(),
            SemanticValue::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) => n.serialize(serializer),
            Scalar::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for SemanticValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SemanticVisitor)
    }
}

struct SemanticVisitor;

impl<'de> Visitor<'de> for SemanticVisitor {
    type Value = SemanticValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar or an object of semantic values")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(SemanticValue::Scalar(Scalar::Null))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        self.visit_unit()
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(SemanticValue::Scalar(Scalar::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(SemanticValue::Scalar(Scalar::Number(v.into())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(SemanticValue::Scalar(Scalar::Number(v.into())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        serde_json::Number::from_f64(v)
            .map(|n| SemanticValue::Scalar(Scalar::Number(n)))
            .ok_or_else(|| E::custom("non-finite number in semantics"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(SemanticValue::text(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(SemanticValue::text(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, SemanticValue>()? {
            entries.push((key, value));
        }
        Ok(SemanticValue::Object(entries))
    }
}
