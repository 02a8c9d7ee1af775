//! In-memory data store with an optional JSON snapshot file

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{DataStore, LoadOptions, SaveContext, StoreError};
use crate::metadata::{Metadata, VERSION_PROPERTY};
use crate::transfer::{Entity, EntityKey, EntityState, PropertyAccess, Value};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    entities: Vec<Entity>,
}

/// Data store holding normalized records in memory
///
/// Records keep references as key-only stubs. Classes with soft delete get a
/// deletion marker on removal when the save context asks for soft deletion;
/// everything else is removed physically.
#[derive(Debug)]
pub struct MemoryStore {
    metadata: Arc<Metadata>,
    records: BTreeMap<EntityKey, Entity>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(metadata: Arc<Metadata>) -> Self {
        MemoryStore {
            metadata,
            records: BTreeMap::new(),
            path: None,
        }
    }

    /// Open a store backed by a snapshot file; a missing file is an empty store
    pub fn open(metadata: Arc<Metadata>, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut store = MemoryStore::new(metadata);

        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let snapshot: Snapshot =
                serde_json::from_str(&text).map_err(|e| StoreError::Snapshot {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            for entity in snapshot.entities {
                store.metadata.class_nn(entity.entity_name())?;
                store.insert(entity);
            }
            log::info!("Loaded {} records from {}", store.len(), path.display());
        } else {
            log::info!("Snapshot {} does not exist, starting empty", path.display());
        }

        store.path = Some(path);
        Ok(store)
    }

    /// Write all records to the snapshot file
    pub fn flush(&self) -> Result<(), StoreError> {
        let path = self.path.as_ref().ok_or(StoreError::NoSnapshotPath)?;
        let snapshot = Snapshot {
            entities: self.records.values().cloned().collect(),
        };
        let text = serde_json::to_string_pretty(&snapshot).map_err(|e| StoreError::Snapshot {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(path, text).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        log::debug!("Flushed {} records to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Put a record in directly, bypassing save semantics
    pub fn insert(&mut self, entity: Entity) {
        let record = normalize(entity);
        self.records.insert(record.key(), record);
    }

    /// Raw record, soft-deleted ones included
    pub fn record(&self, key: &EntityKey) -> Option<&Entity> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check(&self, context: &SaveContext) -> Result<(), StoreError> {
        let mut saved: HashSet<EntityKey> = HashSet::new();
        for entity in context.entities_to_save() {
            self.metadata.class_nn(entity.entity_name())?;
            saved.insert(entity.key());
        }
        for key in context.keys_to_remove() {
            self.metadata.class_nn(&key.entity)?;
            if !self.records.contains_key(key) && !saved.contains(key) {
                return Err(StoreError::NotFound(key.clone()));
            }
        }
        Ok(())
    }
}

impl DataStore for MemoryStore {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn load(&self, key: &EntityKey, options: LoadOptions) -> Result<Option<Entity>, StoreError> {
        self.metadata.class_nn(&key.entity)?;
        Ok(self
            .records
            .get(key)
            .filter(|record| options.include_deleted || !record.is_deleted())
            .cloned())
    }

    fn load_list(&self, entity: &str, options: LoadOptions) -> Result<Vec<Entity>, StoreError> {
        self.metadata.class_nn(entity)?;
        Ok(self
            .records
            .values()
            .filter(|record| record.entity_name() == entity)
            .filter(|record| options.include_deleted || !record.is_deleted())
            .cloned()
            .collect())
    }

    fn save(&mut self, context: SaveContext) -> Result<Vec<Entity>, StoreError> {
        self.check(&context)?;
        let batch = context.into_batch();
        let mut saved = Vec::with_capacity(batch.to_save.len());

        for entity in batch.to_save {
            let versioned = self.metadata.class_nn(entity.entity_name())?.versioned;
            let mut incoming = normalize(entity);
            let key = incoming.key();

            let mut record = match self.records.remove(&key) {
                Some(mut existing) => {
                    let deletion = incoming.deletion().cloned();
                    existing.values_mut().append(incoming.values_mut());
                    match deletion {
                        Some(d) => existing.mark_deleted(d.date, d.by),
                        None => existing.restore(),
                    }
                    existing
                }
                None => incoming,
            };

            if versioned && record.get(VERSION_PROPERTY).is_none_or(Value::is_null) {
                record.set(VERSION_PROPERTY, Value::Int(1));
            }

            log::debug!("Saved {}", key);
            self.records.insert(key, record.clone());
            saved.push(record);
        }

        for key in batch.to_remove {
            let soft = batch.soft_deletion
                && self.metadata.class_nn(&key.entity)?.soft_delete;
            if soft {
                if let Some(record) = self.records.get_mut(&key) {
                    record.mark_deleted(Utc::now(), None);
                    log::debug!("Soft-deleted {}", key);
                }
            } else if self.records.remove(&key).is_some() {
                log::debug!("Removed {}", key);
            }
            saved.retain(|e| e.key() != key || soft);
        }

        Ok(saved)
    }
}

/// Reduce references to stubs and mark the entity as persisted
fn normalize(mut entity: Entity) -> Entity {
    entity.set_state(EntityState::Managed);
    normalize_values(entity.values_mut());
    entity
}

fn normalize_values(values: &mut BTreeMap<String, Value>) {
    for value in values.values_mut() {
        match value {
            Value::Entity(reference) => **reference = reference.to_reference(),
            Value::Collection(items) => {
                for item in items.iter_mut() {
                    *item = item.to_reference();
                }
            }
            Value::Embedded(embedded) => normalize_values(embedded.values_mut()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Cardinality, Datatype, EntityMeta, PropertyMeta};
    use crate::transfer::FetchPlan;

    fn make_metadata() -> Arc<Metadata> {
        let mut customer = EntityMeta::new("Customer")
            .with_property(PropertyMeta::datatype_property("name", Datatype::String))
            .with_property(PropertyMeta::datatype_property(VERSION_PROPERTY, Datatype::Integer))
            .with_property(PropertyMeta::association("owner", "User", Cardinality::ManyToOne));
        customer.id_type = crate::metadata::IdType::String;
        customer.versioned = true;
        customer.soft_delete = true;

        let mut user = EntityMeta::new("User")
            .with_property(PropertyMeta::datatype_property("login", Datatype::String));
        user.id_type = crate::metadata::IdType::String;

        Arc::new(Metadata::from_classes(vec![customer, user]).unwrap())
    }

    fn make_store() -> MemoryStore {
        let mut store = MemoryStore::new(make_metadata());
        store.insert(Entity::new("User", "U1").with("login", Value::String("admin".into())));
        store.insert(
            Entity::new("Customer", "C1")
                .with("name", Value::String("Acme".into()))
                .with(VERSION_PROPERTY, Value::Int(3))
                .with(
                    "owner",
                    Value::Entity(Box::new(
                        Entity::new("User", "U1").with("login", Value::String("admin".into())),
                    )),
                ),
        );
        store
    }

    #[test]
    fn test_insert_normalizes_references() {
        let store = make_store();
        let record = store.record(&EntityKey::new("Customer", "C1")).unwrap();
        assert_eq!(record.state(), EntityState::Managed);
        assert!(record.get("owner").and_then(Value::as_entity).unwrap().is_stub());
    }

    #[test]
    fn test_save_merges_and_assigns_initial_version() {
        let mut store = make_store();
        let mut ctx = SaveContext::new();
        ctx.saving(
            Entity::new("Customer", "C1").with("name", Value::String("Acme Ltd".into())),
            FetchPlan::new("Customer"),
        );
        ctx.saving(
            Entity::new("Customer", "C2").with(VERSION_PROPERTY, Value::Null),
            FetchPlan::new("Customer"),
        );

        let saved = store.save(ctx).unwrap();
        assert_eq!(saved.len(), 2);

        let c1 = store.record(&EntityKey::new("Customer", "C1")).unwrap();
        assert_eq!(c1.get("name").and_then(Value::as_str), Some("Acme Ltd"));
        assert_eq!(c1.version(), Some(3));
        assert!(c1.is_loaded("owner"));

        let c2 = store.record(&EntityKey::new("Customer", "C2")).unwrap();
        assert_eq!(c2.version(), Some(1));
    }

    #[test]
    fn test_soft_and_hard_removal() {
        let mut store = make_store();
        let mut ctx = SaveContext::new();
        ctx.removing(EntityKey::new("Customer", "C1"));
        ctx.removing(EntityKey::new("User", "U1"));
        ctx.set_soft_deletion(true);
        store.save(ctx).unwrap();

        let c1 = EntityKey::new("Customer", "C1");
        assert!(store.record(&c1).unwrap().is_deleted());
        assert!(store.load(&c1, LoadOptions::default()).unwrap().is_none());
        assert!(store.load(&c1, LoadOptions::including_deleted()).unwrap().is_some());
        assert!(store.record(&EntityKey::new("User", "U1")).is_none());
    }

    #[test]
    fn test_failed_save_changes_nothing() {
        let mut store = make_store();
        let mut ctx = SaveContext::new();
        ctx.saving(
            Entity::new("Customer", "C9").with("name", Value::String("New".into())),
            FetchPlan::new("Customer"),
        );
        ctx.removing(EntityKey::new("Customer", "missing"));

        assert!(matches!(store.save(ctx), Err(StoreError::NotFound(_))));
        assert!(store.record(&EntityKey::new("Customer", "C9")).is_none());
    }

    #[test]
    fn test_load_graph_expands_plan() {
        let store = make_store();
        let plan = FetchPlan::new("Customer")
            .add_nested("owner", FetchPlan::new("User").add_property("login"));

        let loaded = store
            .load_graph(&EntityKey::new("Customer", "C1"), &plan, LoadOptions::default())
            .unwrap()
            .unwrap();
        assert!(!loaded.is_loaded("name"));
        assert_eq!(loaded.version(), Some(3));
        let owner = loaded.get("owner").and_then(Value::as_entity).unwrap();
        assert_eq!(owner.get("login").and_then(Value::as_str), Some("admin"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("store.json");

        let mut store = MemoryStore::open(make_metadata(), &path).unwrap();
        assert!(store.is_empty());
        store.insert(Entity::new("User", "U7").with("login", Value::String("guest".into())));
        store.flush().unwrap();

        let reopened = MemoryStore::open(make_metadata(), &path).unwrap();
        let user = reopened.record(&EntityKey::new("User", "U7")).unwrap();
        assert_eq!(user.get("login").and_then(Value::as_str), Some("guest"));
    }
}
