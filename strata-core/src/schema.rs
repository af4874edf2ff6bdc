//! Schema - Define type schemas for resources
//!
//! Handlers define schemas for each resource type so configuration is
//! validated before any remote call is made.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block: a list of attribute maps sharing one schema
    Block(Box<BlockSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                // Extract variant from "Type.variant" format
                let variant = s.split('.').next_back().unwrap_or(s);
                if variants.iter().any(|v| v == variant || s == v) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(block), Value::List(items)) => block.validate_items(items),

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ReadOnly { name: String },

    #[error("Expected between {min} and {} blocks, got {got}", max.map(|m| m.to_string()).unwrap_or_else(|| "any number of".to_string()))]
    BlockCount {
        min: usize,
        max: Option<usize>,
        got: usize,
    },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

/// Value constraints checked in addition to the attribute type
#[derive(Debug, Clone)]
pub enum Validator {
    /// String length (in characters) within an inclusive range
    LengthBetween(usize, usize),
    /// String must match a regular expression
    Matches {
        pattern: &'static str,
        message: &'static str,
    },
    /// String must be one of the listed values
    OneOf(&'static [&'static str]),
}

impl Validator {
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        let Value::String(s) = value else {
            return Ok(());
        };
        match self {
            Validator::LengthBetween(min, max) => {
                let len = s.chars().count();
                if len < *min || len > *max {
                    return Err(TypeError::ValidationFailed {
                        message: format!(
                            "length must be between {} and {}, got {}",
                            min, max, len
                        ),
                    });
                }
                Ok(())
            }
            Validator::Matches { pattern, message } => {
                let re = Regex::new(pattern).map_err(|e| TypeError::ValidationFailed {
                    message: format!("invalid pattern '{}': {}", pattern, e),
                })?;
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(TypeError::ValidationFailed {
                        message: format!("{}, got '{}'", message, s),
                    })
                }
            }
            Validator::OneOf(allowed) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(TypeError::ValidationFailed {
                        message: format!("expected one of {}, got '{}'", allowed.join(", "), s),
                    })
                }
            }
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Can be set in configuration (always true for required attributes)
    pub optional: bool,
    /// Value is filled in by the remote system
    pub computed: bool,
    /// Changing the value forces the resource to be replaced
    pub requires_replace: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub validators: Vec<Validator>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: true,
            computed: false,
            requires_replace: false,
            default: None,
            description: None,
            validators: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = true;
        self
    }

    /// Computed only: the user cannot set it
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self.required = false;
        self
    }

    /// May be set by the user, otherwise computed remotely
    pub fn optional_computed(mut self) -> Self {
        self.computed = true;
        self.optional = true;
        self
    }

    pub fn requires_replace(mut self) -> Self {
        self.requires_replace = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// Schema for a nested block (a list of attribute maps)
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    pub attributes: HashMap<String, AttributeSchema>,
    pub min_items: usize,
    pub max_items: Option<usize>,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = n;
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    /// Exactly one block must be present
    pub fn single(self) -> Self {
        self.min_items(1).max_items(1)
    }

    /// At most one block may be present
    pub fn at_most_one(self) -> Self {
        self.max_items(1)
    }

    /// Wrap into an attribute type
    pub fn into_type(self) -> AttributeType {
        AttributeType::Block(Box::new(self))
    }

    fn validate_items(&self, items: &[Value]) -> Result<(), TypeError> {
        let count_ok =
            items.len() >= self.min_items && self.max_items.is_none_or(|max| items.len() <= max);
        if !count_ok {
            return Err(TypeError::BlockCount {
                min: self.min_items,
                max: self.max_items,
                got: items.len(),
            });
        }

        for (i, item) in items.iter().enumerate() {
            let wrap = |e: TypeError| TypeError::ListItemError {
                index: i,
                inner: Box::new(e),
            };
            let Value::Map(map) = item else {
                return Err(wrap(TypeError::TypeMismatch {
                    expected: "Block".to_string(),
                    got: item.type_name(),
                }));
            };
            validate_attribute_map(&self.attributes, map)
                .map_err(|mut errors| wrap(errors.remove(0)))?;
        }
        Ok(())
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        validate_attribute_map(&self.attributes, attributes)
    }
}

fn validate_attribute_map(
    schemas: &HashMap<String, AttributeSchema>,
    attributes: &HashMap<String, Value>,
) -> Result<(), Vec<TypeError>> {
    let mut errors = Vec::new();

    // Check required attributes
    let mut names: Vec<&String> = schemas.keys().collect();
    names.sort();
    for name in names {
        let schema = &schemas[name];
        if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
            errors.push(TypeError::MissingRequired { name: name.clone() });
        }
    }

    let mut present: Vec<(&String, &Value)> = attributes.iter().collect();
    present.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in present {
        // Unknown attributes are allowed (for flexibility)
        let Some(schema) = schemas.get(name) else {
            continue;
        };
        if schema.is_read_only() {
            errors.push(TypeError::ReadOnly { name: name.clone() });
            continue;
        }
        let checked = schema
            .attr_type
            .validate(value)
            .and_then(|_| schema.validators.iter().try_for_each(|v| v.validate(value)));
        if let Err(e) = checked {
            errors.push(TypeError::AttributeError {
                name: name.clone(),
                inner: Box::new(e),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// ARN type (e.g., "arn:aws:iam::123456789012:role/kb")
    pub fn arn() -> AttributeType {
        AttributeType::Custom {
            name: "Arn".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => validate_arn(s),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// String holding a JSON document
    pub fn json_string() -> AttributeType {
        AttributeType::Custom {
            name: "JsonString".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                    .map(|_| ())
                    .map_err(|e| format!("invalid JSON: {}", e)),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Tags map
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

/// Validate ARN format: `arn:partition:service:region:account:resource`
pub fn validate_arn(arn: &str) -> Result<(), String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(format!(
            "Invalid ARN '{}': expected arn:partition:service:region:account:resource",
            arn
        ));
    }
    if parts[1].is_empty() || parts[2].is_empty() {
        return Err(format!("Invalid ARN '{}': missing partition or service", arn));
    }
    if parts[5].is_empty() {
        return Err(format!("Invalid ARN '{}': missing resource", arn));
    }
    Ok(())
}
