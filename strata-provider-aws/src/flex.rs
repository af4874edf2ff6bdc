//! Conversions between configuration attributes and API models
//!
//! Every handler writes its own `expand` (attributes → model) and `flatten`
//! (model → attributes) functions on top of these readers and writers.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use strata_core::provider::{ProviderError, ProviderResult};
use strata_core::resource::Value;

/// Typed access to an attribute map
#[derive(Debug, Clone, Copy)]
pub struct AttributeReader<'a> {
    attrs: &'a HashMap<String, Value>,
    path: &'a str,
}

impl<'a> AttributeReader<'a> {
    pub fn new(attrs: &'a HashMap<String, Value>) -> Self {
        Self { attrs, path: "" }
    }

    fn qualified(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.attrs.get(name)
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.attrs
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn required_string(&self, name: &str) -> ProviderResult<String> {
        self.string(name).ok_or_else(|| {
            ProviderError::validation(format!(
                "Required attribute '{}' is missing",
                self.qualified(name)
            ))
        })
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.attrs.get(name).and_then(Value::as_int)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.attrs.get(name).and_then(Value::as_bool)
    }

    pub fn strings(&self, name: &str) -> Vec<String> {
        self.attrs
            .get(name)
            .and_then(Value::as_list)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First element of a nested block (blocks are lists of maps)
    pub fn block(&self, name: &'a str) -> Option<AttributeReader<'a>> {
        let map = match self.attrs.get(name)? {
            Value::List(items) => items.first()?.as_map()?,
            Value::Map(map) => map,
            _ => return None,
        };
        Some(AttributeReader {
            attrs: map,
            path: name,
        })
    }

    pub fn required_block(&self, name: &'a str) -> ProviderResult<AttributeReader<'a>> {
        self.block(name).ok_or_else(|| {
            ProviderError::validation(format!(
                "Required block '{}' is missing",
                self.qualified(name)
            ))
        })
    }

    /// String map attribute (e.g., tags)
    pub fn string_map(&self, name: &str) -> Option<HashMap<String, String>> {
        let map = self.attrs.get(name)?.as_map()?;
        Some(
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        )
    }
}

/// Builder for an attribute map; `None` values are skipped
#[derive(Debug, Clone, Default)]
pub struct AttributeWriter {
    attrs: HashMap<String, Value>,
}

impl AttributeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, name: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(v) = value {
            self.attrs.insert(name.to_string(), Value::String(v.into()));
        }
        self
    }

    pub fn int(mut self, name: &str, value: Option<i64>) -> Self {
        if let Some(v) = value {
            self.attrs.insert(name.to_string(), Value::Int(v));
        }
        self
    }

    pub fn bool(mut self, name: &str, value: Option<bool>) -> Self {
        if let Some(v) = value {
            self.attrs.insert(name.to_string(), Value::Bool(v));
        }
        self
    }

    pub fn strings(mut self, name: &str, values: &[String]) -> Self {
        self.attrs.insert(
            name.to_string(),
            Value::List(values.iter().cloned().map(Value::String).collect()),
        );
        self
    }

    /// Nested block, stored as a one-element list
    pub fn block(mut self, name: &str, block: Option<AttributeWriter>) -> Self {
        if let Some(block) = block {
            self.attrs.insert(
                name.to_string(),
                Value::List(vec![Value::Map(block.finish())]),
            );
        }
        self
    }

    pub fn string_map(mut self, name: &str, map: Option<&HashMap<String, String>>) -> Self {
        if let Some(map) = map.filter(|m| !m.is_empty()) {
            self.attrs.insert(
                name.to_string(),
                Value::Map(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        }
        self
    }

    pub fn value(mut self, name: &str, value: Option<Value>) -> Self {
        if let Some(v) = value {
            self.attrs.insert(name.to_string(), v);
        }
        self
    }

    pub fn finish(self) -> HashMap<String, Value> {
        self.attrs
    }
}

/// Tag in CloudFormation list format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Build tags array for CloudFormation format, sorted by key
pub fn build_tags(tags: &HashMap<String, String>) -> Vec<Tag> {
    let mut list: Vec<Tag> = tags
        .iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect();
    list.sort_by(|a, b| a.key.cmp(&b.key));
    list
}

/// Parse tags from CloudFormation format to map
pub fn parse_tags(tags: &[Tag]) -> HashMap<String, String> {
    tags.iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect()
}

/// Render epoch milliseconds as an RFC 3339 timestamp
pub fn epoch_millis_to_rfc3339(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Render epoch seconds as an RFC 3339 timestamp
pub fn epoch_seconds_to_rfc3339(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Re-render an RFC 3339 timestamp in UTC with whole seconds
pub fn normalize_rfc3339(timestamp: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.to_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Parse a model out of a remote property document
pub fn from_properties<T>(type_name: &str, properties: serde_json::Value) -> ProviderResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(properties)
        .map_err(|e| ProviderError::new(format!("Failed to parse {} properties: {}", type_name, e)))
}

/// Serialize a model into a remote property document
pub fn to_properties<T: Serialize>(model: &T) -> ProviderResult<serde_json::Value> {
    serde_json::to_value(model)
        .map_err(|e| ProviderError::new(format!("Failed to serialize properties: {}", e)))
}
