//! Attribute values with embedded references

use crate::model::address::ResourceAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix and suffix of the symbolic reference syntax `ref(kind.name.attribute)`
const REF_PREFIX: &str = "ref(";
const REF_SUFFIX: &str = ")";

/// Symbolic reference to another resource's attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    pub target: ResourceAddress,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceAddress, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parse `ref(kind.name.attr)` or `ref(kind.name[0].attr)`
    ///
    /// Returns `Ok(None)` when the string is not reference syntax at all.
    pub fn parse(s: &str) -> Result<Option<Self>, String> {
        let Some(inner) = s
            .strip_prefix(REF_PREFIX)
            .and_then(|rest| rest.strip_suffix(REF_SUFFIX))
        else {
            return Ok(None);
        };

        let (address, attribute) = inner
            .rsplit_once('.')
            .ok_or_else(|| format!("malformed reference '{}'", s))?;
        if attribute.is_empty() || attribute.contains(['[', ']']) {
            return Err(format!("malformed reference '{}'", s));
        }
        let target = address
            .parse::<ResourceAddress>()
            .map_err(|e| format!("malformed reference '{}': {}", s, e))?;

        Ok(Some(Self::new(target, attribute)))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}{}", REF_PREFIX, self.target, self.attribute, REF_SUFFIX)
    }
}

/// A configuration value
///
/// Literal values mirror JSON. `Reference` stays unresolved until the
/// referenced resource has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", try_from = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Reference(Reference),
}

impl Value {
    pub fn reference(target: ResourceAddress, attribute: impl Into<String>) -> Self {
        Self::Reference(Reference::new(target, attribute))
    }

    /// Convert a JSON value, turning `ref(...)` strings into references
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        Ok(match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => match Reference::parse(&s)? {
                Some(reference) => Self::Reference(reference),
                None => Self::String(s),
            },
            serde_json::Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                    .collect::<Result<_, String>>()?,
            ),
        })
    }

    /// Short type name used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Reference(_) => "reference",
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// All references inside this value, paired with their field path
    /// relative to `base` (e.g. `tags.owner`, `subnets[1]`).
    pub fn references(&self, base: &str) -> Vec<(String, &Reference)> {
        let mut found = Vec::new();
        self.collect_references(base.to_string(), &mut found);
        found
    }

    fn collect_references<'a>(&'a self, path: String, found: &mut Vec<(String, &'a Reference)>) {
        match self {
            Self::Reference(reference) => found.push((path, reference)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(format!("{}[{}]", path, i), found);
                }
            }
            Self::Map(map) => {
                for (key, item) in map {
                    item.collect_references(format!("{}.{}", path, key), found);
                }
            }
            _ => {}
        }
    }

    /// Resolve references through `lookup`
    ///
    /// Returns `None` if any reference cannot be resolved yet.
    pub fn resolve_with<F>(&self, lookup: &mut F) -> Option<serde_json::Value>
    where
        F: FnMut(&Reference) -> Option<serde_json::Value>,
    {
        Some(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve_with(lookup))
                    .collect::<Option<_>>()?,
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Some((k.clone(), v.resolve_with(lookup)?)))
                    .collect::<Option<_>>()?,
            ),
            Self::Reference(reference) => lookup(reference)?,
        })
    }

    /// The literal JSON form, if this value holds no references
    pub fn as_literal(&self) -> Option<serde_json::Value> {
        self.resolve_with(&mut |_| None)
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Reference(reference) => serde_json::Value::String(reference.to_string()),
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}
