//! Entity instances, identities and name-based property access

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::Value;
use crate::metadata::{IdType, VERSION_PROPERTY};

/// Identity of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Int(i64),
    String(String),
}

impl EntityId {
    /// Parse an identity from JSON according to the class id type
    pub fn from_json(json: &serde_json::Value, id_type: IdType) -> Result<Self, String> {
        match (id_type, json) {
            (IdType::Uuid, serde_json::Value::String(s)) => Uuid::parse_str(s)
                .map(EntityId::Uuid)
                .map_err(|e| format!("invalid uuid id '{}': {}", s, e)),
            (IdType::Integer, serde_json::Value::Number(n)) => n
                .as_i64()
                .map(EntityId::Int)
                .ok_or_else(|| format!("invalid integer id {}", n)),
            (IdType::Integer, serde_json::Value::String(s)) => s
                .parse::<i64>()
                .map(EntityId::Int)
                .map_err(|_| format!("invalid integer id '{}'", s)),
            (IdType::String, serde_json::Value::String(s)) => Ok(EntityId::String(s.clone())),
            (IdType::String, serde_json::Value::Number(n)) => Ok(EntityId::String(n.to_string())),
            (_, other) => Err(format!("unsupported id value {}", other)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EntityId::Uuid(u) => serde_json::Value::String(u.to_string()),
            EntityId::Int(i) => serde_json::json!(*i),
            EntityId::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Uuid(u) => write!(f, "{}", u),
            EntityId::Int(i) => write!(f, "{}", i),
            EntityId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        EntityId::Uuid(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Int(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::String(value.to_string())
    }
}

/// Logical identity of an entity: class name plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity: String,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: impl Into<EntityId>) -> Self {
        EntityKey {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.entity, self.id)
    }
}

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Created in this process, not persisted yet
    New,
    /// Loaded from the store
    Managed,
    /// Deserialized or otherwise outside the store's knowledge
    #[default]
    Detached,
}

/// Soft-deletion marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

/// Name-based access to the properties of an entity or embedded object
pub trait PropertyAccess {
    /// Class name of the instance
    fn entity_name(&self) -> &str;

    /// All loaded properties
    fn values(&self) -> &BTreeMap<String, Value>;

    fn values_mut(&mut self) -> &mut BTreeMap<String, Value>;

    /// Property value; `None` when the property is not loaded
    fn get(&self, property: &str) -> Option<&Value> {
        self.values().get(property)
    }

    fn get_mut(&mut self, property: &str) -> Option<&mut Value> {
        self.values_mut().get_mut(property)
    }

    fn set(&mut self, property: &str, value: Value) {
        self.values_mut().insert(property.to_string(), value);
    }

    /// Remove a property value, leaving it not loaded
    fn take(&mut self, property: &str) -> Option<Value> {
        self.values_mut().remove(property)
    }

    fn is_loaded(&self, property: &str) -> bool {
        self.values().contains_key(property)
    }
}

/// A persistent business object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    entity_name: String,
    id: EntityId,
    #[serde(default)]
    state: EntityState,
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted: Option<Deletion>,
}

impl Entity {
    /// Create a new, not yet persisted instance
    pub fn new(entity_name: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Entity {
            entity_name: entity_name.into(),
            id: id.into(),
            state: EntityState::New,
            values: BTreeMap::new(),
            deleted: None,
        }
    }

    /// Create a detached instance, as produced by deserialization
    pub fn detached(entity_name: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Entity {
            state: EntityState::Detached,
            ..Entity::new(entity_name, id)
        }
    }

    /// Key-only stub pointing at an entity
    pub fn reference(key: &EntityKey) -> Self {
        Entity::detached(key.entity.clone(), key.id.clone())
    }

    /// Builder-style property setter
    pub fn with(mut self, property: &str, value: Value) -> Self {
        self.set(property, value);
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            entity: self.entity_name.clone(),
            id: self.id.clone(),
        }
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    pub fn is_new(&self) -> bool {
        self.state == EntityState::New
    }

    /// Whether nothing but the key is present
    pub fn is_stub(&self) -> bool {
        self.values.is_empty() && self.deleted.is_none()
    }

    /// Same entity, reduced to its key
    pub fn to_reference(&self) -> Entity {
        Entity::reference(&self.key())
    }

    /// Optimistic-lock counter, when loaded and set
    pub fn version(&self) -> Option<i64> {
        self.get(VERSION_PROPERTY).and_then(Value::as_int)
    }

    pub fn deletion(&self) -> Option<&Deletion> {
        self.deleted.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn mark_deleted(&mut self, date: DateTime<Utc>, by: Option<String>) {
        self.deleted = Some(Deletion { date, by });
    }

    /// Clear the soft-deletion marker
    pub fn restore(&mut self) {
        self.deleted = None;
    }
}

impl PropertyAccess for Entity {
    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    fn values_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.values
    }
}

/// An embedded object: properties of an owning entity grouped under one
/// class, without identity of its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedded {
    entity_name: String,
    #[serde(default)]
    values: BTreeMap<String, Value>,
}

impl Embedded {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Embedded {
            entity_name: entity_name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, property: &str, value: Value) -> Self {
        self.set(property, value);
        self
    }
}

impl PropertyAccess for Embedded {
    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    fn values_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.values
    }
}

/// Follow a path of embedded properties from an entity down to the holder
pub fn embedded_holder_mut<'a>(
    entity: &'a mut Entity,
    path: &[String],
) -> Option<&'a mut dyn PropertyAccess> {
    let mut holder: &mut dyn PropertyAccess = entity;
    for segment in path {
        match holder.get_mut(segment) {
            Some(Value::Embedded(embedded)) => holder = &mut **embedded,
            _ => return None,
        }
    }
    Some(holder)
}

/// Logical equality by identity
pub trait Identified {
    fn identity(&self) -> &EntityId;
}

impl Identified for Entity {
    fn identity(&self) -> &EntityId {
        &self.id
    }
}

impl Identified for EntityKey {
    fn identity(&self) -> &EntityId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_from_json_by_type() {
        assert_eq!(
            EntityId::from_json(&json!(7), IdType::Integer).unwrap(),
            EntityId::Int(7)
        );
        assert_eq!(
            EntityId::from_json(&json!("7"), IdType::Integer).unwrap(),
            EntityId::Int(7)
        );
        assert_eq!(
            EntityId::from_json(&json!("E1"), IdType::String).unwrap(),
            EntityId::String("E1".to_string())
        );
        assert!(EntityId::from_json(&json!("E1"), IdType::Uuid).is_err());
        assert!(EntityId::from_json(&json!(true), IdType::String).is_err());
    }

    #[test]
    fn test_logical_equality_by_key() {
        let a = Entity::detached("Customer", "C1").with("name", Value::String("A".into()));
        let b = Entity::new("Customer", "C1");
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
        assert!(b.to_reference().is_stub());
    }

    #[test]
    fn test_not_loaded_vs_null() {
        let mut e = Entity::detached("Customer", "C1");
        assert!(!e.is_loaded("name"));
        e.set("name", Value::Null);
        assert!(e.is_loaded("name"));
        assert_eq!(e.take("name"), Some(Value::Null));
        assert!(!e.is_loaded("name"));
    }

    #[test]
    fn test_embedded_holder_path() {
        let mut e = Entity::new("Customer", "C1").with(
            "address",
            Value::Embedded(Box::new(
                Embedded::new("Address").with("city", Value::String("Oslo".into())),
            )),
        );

        let holder = embedded_holder_mut(&mut e, &["address".to_string()]).unwrap();
        assert_eq!(holder.entity_name(), "Address");
        holder.set("city", Value::String("Bergen".into()));

        let city = e
            .get("address")
            .and_then(Value::as_embedded)
            .and_then(|a| a.get("city"))
            .and_then(Value::as_str);
        assert_eq!(city, Some("Bergen"));

        assert!(embedded_holder_mut(&mut e, &["missing".to_string()]).is_none());
    }

    #[test]
    fn test_soft_delete_marker() {
        let mut e = Entity::new("Customer", "C1");
        e.mark_deleted(Utc::now(), Some("admin".to_string()));
        assert!(e.is_deleted());
        e.restore();
        assert!(!e.is_deleted());
    }
}
