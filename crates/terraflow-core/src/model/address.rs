//! Resource addresses (`kind.name` / `kind.name[index]`)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of one resource instance
///
/// Ordering is lexicographic on `(kind, name, index)`, which keeps graph
/// construction and wave layout deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceAddress {
    kind: String,
    name: String,
    index: Option<u32>,
}

impl ResourceAddress {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(kind: impl Into<String>, name: impl Into<String>, index: u32) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            index: Some(index),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for ResourceAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());

        let (kind, rest) = s.split_once('.').ok_or_else(invalid)?;
        let (name, index) = match rest.split_once('[') {
            Some((name, tail)) => {
                let digits = tail.strip_suffix(']').ok_or_else(invalid)?;
                let index = digits.parse::<u32>().map_err(|_| invalid())?;
                (name, Some(index))
            }
            None => (rest, None),
        };

        if !is_valid_segment(kind) || !is_valid_segment(name) {
            return Err(invalid());
        }

        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
            index,
        })
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}.{}[{}]", self.kind, self.name, index),
            None => write!(f, "{}.{}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_address() {
        let address: ResourceAddress = "local_file.config".parse().unwrap();
        assert_eq!(address.kind(), "local_file");
        assert_eq!(address.name(), "config");
        assert_eq!(address.index(), None);
        assert_eq!(address.to_string(), "local_file.config");
    }

    #[test]
    fn test_parse_indexed_address() {
        let address: ResourceAddress = "aws_subnet.private[2]".parse().unwrap();
        assert_eq!(address, ResourceAddress::indexed("aws_subnet", "private", 2));
        assert_eq!(address.to_string(), "aws_subnet.private[2]");
    }

    #[test]
    fn test_parse_invalid_addresses() {
        for input in ["", "nodot", ".name", "kind.", "kind.name[", "kind.name[x]", "a.b.c"] {
            assert!(
                input.parse::<ResourceAddress>().is_err(),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let mut addresses = vec![
            ResourceAddress::indexed("b", "x", 1),
            ResourceAddress::new("a", "z"),
            ResourceAddress::indexed("b", "x", 0),
        ];
        addresses.sort();
        assert_eq!(addresses[0].to_string(), "a.z");
        assert_eq!(addresses[1].to_string(), "b.x[0]");
        assert_eq!(addresses[2].to_string(), "b.x[1]");
    }

    #[test]
    fn test_serde_as_string() {
        let address = ResourceAddress::new("local_file", "a");
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"local_file.a\"");
        let back: ResourceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
