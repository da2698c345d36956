//! Shard-key space: typed key values, route keys and key patterns.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

/// A single typed value within a route key.
///
/// The derived ordering is the cross-type order used for routing:
/// `MinKey < Number < Text < MaxKey`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    /// Sorts before every other value.
    MinKey,
    /// A 64-bit integer value.
    Number(i64),
    /// A UTF-8 string value.
    Text(String),
    /// Sorts after every other value.
    MaxKey,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => f.write_str("MinKey"),
            KeyValue::Number(n) => write!(f, "{}", n),
            KeyValue::Text(s) => write!(f, "\"{}\"", s),
            KeyValue::MaxKey => f.write_str("MaxKey"),
        }
    }
}

/// A point in shard-key space: one value per shard-key field, ordered
/// lexicographically field by field.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    values: Vec<KeyValue>,
}

impl RouteKey {
    /// Creates a route key from its field values.
    pub fn new(values: Vec<KeyValue>) -> Self {
        RouteKey { values }
    }

    /// Convenience constructor for a single-field integer key.
    pub fn number(n: i64) -> Self {
        RouteKey {
            values: vec![KeyValue::Number(n)],
        }
    }

    /// Returns the field values of this key.
    pub fn values(&self) -> &[KeyValue] {
        &self.values
    }

    /// Number of fields bound by this key.
    pub fn arity(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str("}")
    }
}

/// The shard-key pattern of a collection: the ordered list of field names
/// a route key must bind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPattern {
    fields: Vec<String>,
}

impl KeyPattern {
    /// Creates a key pattern from field names. Field names must be
    /// non-empty and unique.
    pub fn new(fields: Vec<String>) -> Result<Self, RoutingError> {
        if fields.is_empty() {
            return Err(RoutingError::InvalidKey("empty key pattern".to_string()));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.is_empty() {
                return Err(RoutingError::InvalidKey(
                    "empty field name in key pattern".to_string(),
                ));
            }
            if fields[..i].contains(field) {
                return Err(RoutingError::InvalidKey(format!(
                    "duplicate field '{}' in key pattern",
                    field
                )));
            }
        }
        Ok(KeyPattern { fields })
    }

    /// Convenience constructor for a single-field pattern.
    pub fn single(field: &str) -> Result<Self, RoutingError> {
        Self::new(vec![field.to_string()])
    }

    /// Returns the ordered field names of the pattern.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns true if `key` binds exactly the pattern's fields.
    pub fn is_valid_key(&self, key: &RouteKey) -> bool {
        key.arity() == self.fields.len()
    }

    /// The key sorting before every key under this pattern.
    pub fn global_min(&self) -> RouteKey {
        RouteKey::new(vec![KeyValue::MinKey; self.fields.len()])
    }

    /// The key sorting after every key under this pattern.
    pub fn global_max(&self) -> RouteKey {
        RouteKey::new(vec![KeyValue::MaxKey; self.fields.len()])
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fields.join(", "))
    }
}
