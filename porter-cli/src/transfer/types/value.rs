//! Property value representation for imports and exports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{Embedded, Entity, EntityKey, PropertyAccess};
use crate::metadata::Datatype;

/// A property value held by an entity or embedded object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
#[derive(Default)]
pub enum Value {
    /// Null/empty value
    #[default]
    Null,
    /// String value
    String(String),
    /// Whole number (integer)
    Int(i64),
    /// Floating point (decimal)
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Date and time
    DateTime(DateTime<Utc>),
    /// Unique identifier
    Guid(Uuid),
    /// Enumeration value, stored by its id
    Enum(String),
    /// Reference to a single entity (full instance or key-only stub)
    Entity(Box<Entity>),
    /// Embedded object
    Embedded(Box<Embedded>),
    /// Reference to many entities
    Collection(Vec<Entity>),
}

impl Value {
    /// Key-only reference to an entity
    pub fn reference(key: &EntityKey) -> Self {
        Value::Entity(Box::new(Entity::reference(key)))
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as referenced entity
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Try to get as embedded object
    pub fn as_embedded(&self) -> Option<&Embedded> {
        match self {
            Value::Embedded(e) => Some(e),
            _ => None,
        }
    }

    /// Collection items; null counts as empty
    pub fn as_collection(&self) -> Option<&[Entity]> {
        match self {
            Value::Collection(items) => Some(items),
            Value::Null => Some(&[]),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "decimal",
            Value::Bool(_) => "boolean",
            Value::DateTime(_) => "date-time",
            Value::Guid(_) => "uuid",
            Value::Enum(_) => "enum",
            Value::Entity(_) => "entity",
            Value::Embedded(_) => "embedded",
            Value::Collection(_) => "collection",
        }
    }

    /// Convert a scalar value to JSON
    ///
    /// Entity-valued variants are rendered by the serializer, which needs the
    /// metamodel; here they fall back to their key.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) | Value::Enum(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Guid(g) => serde_json::Value::String(g.to_string()),
            Value::Entity(e) => serde_json::Value::String(e.key().to_string()),
            Value::Embedded(_) => serde_json::Value::Null,
            Value::Collection(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|e| serde_json::Value::String(e.key().to_string()))
                    .collect(),
            ),
        }
    }

    /// Parse a JSON scalar into a value of the given datatype
    pub fn from_json(json: &serde_json::Value, datatype: Datatype) -> Result<Self, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }

        match datatype {
            Datatype::String => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| format!("expected a string, got {}", json)),
            Datatype::Integer => json
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("expected an integer, got {}", json)),
            Datatype::Decimal => match json {
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| format!("expected a decimal, got {}", json)),
                serde_json::Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| format!("expected a decimal, got {}", json)),
                _ => Err(format!("expected a decimal, got {}", json)),
            },
            Datatype::Boolean => json
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("expected a boolean, got {}", json)),
            Datatype::DateTime => {
                let s = json
                    .as_str()
                    .ok_or_else(|| format!("expected a date-time string, got {}", json))?;
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .map_err(|e| format!("invalid date-time '{}': {}", s, e))
            }
            Datatype::Uuid => {
                let s = json
                    .as_str()
                    .ok_or_else(|| format!("expected a uuid string, got {}", json))?;
                Uuid::parse_str(s)
                    .map(Value::Guid)
                    .map_err(|e| format!("invalid uuid '{}': {}", s, e))
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Enum(s) => write!(f, "{}", s),
            Value::Entity(e) => write!(f, "{}", e.key()),
            Value::Embedded(e) => write!(f, "{}(embedded)", e.entity_name()),
            Value::Collection(items) => write!(f, "[{} items]", items.len()),
        }
    }
}
