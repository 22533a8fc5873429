//! Property values and well-known names shared by nodes, sidecars and events.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// Name of the content sub-node of every file node.
pub const CONTENT_CHILD: &str = "jcr:content";
/// Creation timestamp of folders and files.
pub const CREATED_PROPERTY: &str = "jcr:created";
/// Binary payload of a content sub-node.
pub const DATA_PROPERTY: &str = "jcr:data";
/// Last modification timestamp of a content sub-node.
pub const LAST_MODIFIED_PROPERTY: &str = "jcr:lastModified";
/// Detected MIME type of a content sub-node.
pub const MIME_TYPE_PROPERTY: &str = "jcr:mimeType";

/// Properties computed from the native entry; never stored as extra properties.
pub const BUILT_IN_PROPERTIES: [&str; 4] = [
    CREATED_PROPERTY,
    DATA_PROPERTY,
    LAST_MODIFIED_PROPERTY,
    MIME_TYPE_PROPERTY,
];

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
        }
    }

    /// Parses the textual form produced by `Display` for the given type name.
    pub fn parse_typed(type_name: &str, text: &str) -> Result<Self> {
        let invalid = |error: String| {
            ConnectorError::Serialization(format!("invalid {type_name} value '{text}': {error}"))
        };
        match type_name {
            "string" => Ok(Self::String(text.to_string())),
            "long" => text
                .parse()
                .map(Self::Long)
                .map_err(|error| invalid(error.to_string())),
            "double" => text
                .parse()
                .map(Self::Double)
                .map_err(|error| invalid(error.to_string())),
            "boolean" => text
                .parse()
                .map(Self::Boolean)
                .map_err(|error| invalid(error.to_string())),
            "date" => DateTime::parse_from_rfc3339(text)
                .map(|date| Self::Date(date.with_timezone(&Utc)))
                .map_err(|error| invalid(error.to_string())),
            other => Err(ConnectorError::Serialization(format!(
                "unknown property type '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Long(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Date(value) => f.write_str(&value.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

/// Property name to value(s). Single-valued properties hold one element.
pub type ExtraProperties = BTreeMap<String, Vec<Value>>;

/// Returns true for names computed from the native entry.
pub fn is_built_in_property(name: &str) -> bool {
    BUILT_IN_PROPERTIES.contains(&name)
}

/// Merges `update` into `current`; an empty value list removes the property.
pub fn merge_properties(current: &mut ExtraProperties, update: &ExtraProperties) {
    for (name, values) in update {
        if values.is_empty() {
            current.remove(name);
        } else {
            current.insert(name.clone(), values.clone());
        }
    }
}

/// Drops built-in names, which always come from the native entry.
pub fn without_built_ins(properties: &ExtraProperties) -> ExtraProperties {
    properties
        .iter()
        .filter(|(name, _)| !is_built_in_property(name))
        .map(|(name, values)| (name.clone(), values.clone()))
        .collect()
}

/// Converts a native timestamp, falling back to the epoch when unavailable.
pub fn to_utc(time: std::io::Result<SystemTime>) -> DateTime<Utc> {
    DateTime::<Utc>::from(time.unwrap_or(SystemTime::UNIX_EPOCH))
}
