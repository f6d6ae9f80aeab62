//! Per-kind attribute schemas
//!
//! A schema is the static metadata a resource adapter declares: which
//! attributes exist, which of them are immutable (`force_new`), which are
//! filled in by the provider (`computed`), and how replacements are ordered.

use crate::error::ConfigError;
use crate::model::address::ResourceAddress;
use crate::model::config::ResourceConfig;
use crate::model::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Name of the implicit computed identifier attribute
pub const ID_ATTRIBUTE: &str = "id";

/// Type of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    String,
    Number,
    Bool,
    List,
    Map,
    Any,
}

impl AttrType {
    /// Whether a literal value fits this type (null always fits)
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (_, Value::Reference(_)) | (AttrType::Any, _) => true,
            (AttrType::String, Value::String(_)) => true,
            (AttrType::Number, Value::Number(_)) => true,
            (AttrType::Bool, Value::Bool(_)) => true,
            (AttrType::List, Value::List(_)) => true,
            (AttrType::Map, Value::Map(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::String => write!(f, "string"),
            AttrType::Number => write!(f, "number"),
            AttrType::Bool => write!(f, "bool"),
            AttrType::List => write!(f, "list"),
            AttrType::Map => write!(f, "map"),
            AttrType::Any => write!(f, "any"),
        }
    }
}

/// Declaration of a single attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    pub ty: AttrType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Changing this attribute cannot be done in place
    pub force_new: bool,
    pub default: Option<serde_json::Value>,
}

impl AttributeSchema {
    pub fn required(ty: AttrType) -> Self {
        Self {
            ty,
            required: true,
            optional: false,
            computed: false,
            force_new: false,
            default: None,
        }
    }

    pub fn optional(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: true,
            computed: false,
            force_new: false,
            default: None,
        }
    }

    /// Set only by the provider
    pub fn computed(ty: AttrType) -> Self {
        Self {
            ty,
            required: false,
            optional: false,
            computed: true,
            force_new: false,
            default: None,
        }
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Optional attribute whose value the provider fills in when unset
    pub fn and_computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether configuration may set this attribute
    pub fn is_settable(&self) -> bool {
        self.required || self.optional
    }
}

/// Per-operation call timeouts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

/// Schema of one resource kind
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    pub kind: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Replacement creates the new object before removing the old one
    pub create_before_destroy: bool,
    /// `false` when the kind has no in-place update at all
    pub updatable: bool,
    pub timeouts: Timeouts,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: BTreeMap::new(),
            create_before_destroy: false,
            updatable: true,
            timeouts: Timeouts::default(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    pub fn create_before_destroy(mut self, enabled: bool) -> Self {
        self.create_before_destroy = enabled;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Names of attributes whose change forces a replacement
    pub fn immutable_attributes(&self) -> BTreeSet<&str> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.force_new)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Whether `name` can be read from an applied resource
    pub fn has_attribute(&self, name: &str) -> bool {
        name == ID_ATTRIBUTE || self.attributes.contains_key(name)
    }

    /// Check a resource configuration against this schema
    ///
    /// Reference targets are checked by the graph builder; here only the
    /// shape of the attribute map is validated.
    pub fn validate(&self, address: &ResourceAddress, config: &ResourceConfig) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for (field, value) in &config.attributes {
            let Some(attr) = self.attributes.get(field) else {
                errors.push(ConfigError::UnknownAttribute {
                    address: address.clone(),
                    field: field.clone(),
                });
                continue;
            };
            if !attr.is_settable() {
                errors.push(ConfigError::ComputedAttribute {
                    address: address.clone(),
                    field: field.clone(),
                });
                continue;
            }
            if !attr.ty.accepts(value) {
                errors.push(ConfigError::TypeMismatch {
                    address: address.clone(),
                    field: field.clone(),
                    expected: attr.ty.to_string(),
                    found: value.type_name().to_string(),
                });
            }
        }

        for (field, attr) in &self.attributes {
            let missing = config
                .attributes
                .get(field)
                .is_none_or(|v| matches!(v, Value::Null));
            if attr.required && missing {
                errors.push(ConfigError::MissingAttribute {
                    address: address.clone(),
                    field: field.clone(),
                });
            }
        }

        errors
    }
}

/// Lookup of schemas by resource kind
pub trait SchemaSource {
    fn schema(&self, kind: &str) -> Option<&ResourceSchema>;
}

/// Plain in-memory schema collection
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.insert(schema);
        self
    }

    pub fn insert(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.kind.clone(), schema);
    }
}

impl SchemaSource for SchemaSet {
    fn schema(&self, kind: &str) -> Option<&ResourceSchema> {
        self.schemas.get(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_schema() -> ResourceSchema {
        ResourceSchema::new("bucket")
            .attribute("name", AttributeSchema::required(AttrType::String).force_new())
            .attribute(
                "versioning",
                AttributeSchema::optional(AttrType::Bool).with_default(serde_json::json!(false)),
            )
            .attribute("arn", AttributeSchema::computed(AttrType::String))
    }

    #[test]
    fn test_immutable_attributes() {
        let schema = bucket_schema();
        assert_eq!(schema.immutable_attributes(), BTreeSet::from(["name"]));
        assert!(schema.has_attribute("id"));
        assert!(schema.has_attribute("arn"));
        assert!(!schema.has_attribute("region"));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let schema = bucket_schema();
        let address = ResourceAddress::new("bucket", "logs");
        let config = ResourceConfig::new()
            .with_attribute("versioning", "yes")
            .with_attribute("arn", "arn:x")
            .with_attribute("region", "tk1a");

        let errors = schema.validate(&address, &config);
        assert_eq!(errors.len(), 4);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::MissingAttribute { field, .. } if field == "name")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::TypeMismatch { field, .. } if field == "versioning")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::ComputedAttribute { field, .. } if field == "arn")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownAttribute { field, .. } if field == "region")));
    }

    #[test]
    fn test_reference_satisfies_any_type() {
        let schema = bucket_schema();
        let address = ResourceAddress::new("bucket", "logs");
        let config = ResourceConfig::new().with_attribute(
            "name",
            Value::reference(ResourceAddress::new("random_id", "suffix"), "hex"),
        );
        assert!(schema.validate(&address, &config).is_empty());
    }
}
