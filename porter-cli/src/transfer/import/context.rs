//! Per-call import state: deferred references and the reference cache

use std::collections::{HashMap, HashSet};

use crate::transfer::{Entity, EntityId, EntityKey, ImportViewProperty, Value};

/// Where a property lives: an entity, optionally inside embedded objects
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub key: EntityKey,
    /// Embedded properties leading from the entity to the holder
    pub path: Vec<String>,
}

impl Owner {
    pub fn root(key: EntityKey) -> Self {
        Owner {
            key,
            path: Vec::new(),
        }
    }

    pub fn descend(&self, property: &str) -> Self {
        let mut path = self.path.clone();
        path.push(property.to_string());
        Owner {
            key: self.key.clone(),
            path,
        }
    }
}

/// A reference left for the second pass
#[derive(Debug, Clone)]
pub struct ReferenceInfo {
    pub owner: Owner,
    /// Class of the holder the property belongs to
    pub holder_class: String,
    pub property: ImportViewProperty,
    /// Value as given by the source
    pub value: Value,
    /// Value the destination held before the import
    pub prev_value: Value,
    /// Collection members hidden by row-level filtering on either side
    pub filtered: HashSet<EntityId>,
}

impl ReferenceInfo {
    /// `Class.property`, as used in error messages
    pub fn property_path(&self) -> String {
        format!("{}.{}", self.holder_class, self.property.name)
    }
}

/// Entities looked up while resolving references in one call
#[derive(Debug, Default)]
pub struct LoadedEntities {
    entities: HashMap<EntityKey, Entity>,
}

impl LoadedEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.key(), entity);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
