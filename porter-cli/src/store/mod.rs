//! Persistence collaborator: loading by identity and atomic batch saves

pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::{Metadata, MetadataError, VERSION_PROPERTY};
use crate::transfer::{Entity, EntityKey, FetchPlan, PropertyAccess, Value};

pub use memory::MemoryStore;

/// Error raised by a data store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(EntityKey),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("failed to access snapshot {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot {path:?}: {message}")]
    Snapshot { path: PathBuf, message: String },
    #[error("store has no snapshot path")]
    NoSnapshotPath,
}

/// Options for loading entities
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Also return soft-deleted entities
    pub include_deleted: bool,
}

impl LoadOptions {
    pub fn including_deleted() -> Self {
        LoadOptions {
            include_deleted: true,
        }
    }
}

/// Everything one save call creates, updates and removes
///
/// Entities are kept in registration order and addressed by key. During an
/// import an entity can be checked out for merging and checked back in.
#[derive(Debug, Default)]
pub struct SaveContext {
    to_save: Vec<Option<Entity>>,
    index: HashMap<EntityKey, usize>,
    fetch_plans: HashMap<EntityKey, FetchPlan>,
    to_remove: Vec<EntityKey>,
    soft_deletion: bool,
}

/// A consumed [`SaveContext`]
#[derive(Debug)]
pub struct SaveBatch {
    pub to_save: Vec<Entity>,
    pub fetch_plans: HashMap<EntityKey, FetchPlan>,
    pub to_remove: Vec<EntityKey>,
    pub soft_deletion: bool,
}

impl SaveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity for saving, with the plan it was loaded with
    ///
    /// Registering a key twice replaces the entity but keeps its position.
    pub fn saving(&mut self, entity: Entity, plan: FetchPlan) {
        let key = entity.key();
        self.fetch_plans.insert(key.clone(), plan);
        match self.index.get(&key) {
            Some(&idx) => self.to_save[idx] = Some(entity),
            None => {
                self.index.insert(key, self.to_save.len());
                self.to_save.push(Some(entity));
            }
        }
    }

    /// Register a key for saving before its entity is available; the slot
    /// stays checked out until [`SaveContext::checkin`]
    pub fn reserve(&mut self, key: EntityKey, plan: FetchPlan) {
        if self.index.contains_key(&key) {
            return;
        }
        self.fetch_plans.insert(key.clone(), plan);
        self.index.insert(key, self.to_save.len());
        self.to_save.push(None);
    }

    /// Register an entity for removal
    pub fn removing(&mut self, key: EntityKey) {
        if !self.to_remove.contains(&key) {
            log::debug!("Queued {} for removal", key);
            self.to_remove.push(key);
        }
    }

    /// Whether the key was registered for saving
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn is_removing(&self, key: &EntityKey) -> bool {
        self.to_remove.contains(key)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        let idx = *self.index.get(key)?;
        self.to_save[idx].as_ref()
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        let idx = *self.index.get(key)?;
        self.to_save[idx].as_mut()
    }

    /// Take a registered entity out for merging
    ///
    /// Returns `None` when the key is unknown or already checked out.
    pub fn checkout(&mut self, key: &EntityKey) -> Option<Entity> {
        let idx = *self.index.get(key)?;
        self.to_save[idx].take()
    }

    /// Put a checked-out entity back in its slot
    pub fn checkin(&mut self, entity: Entity) {
        let key = entity.key();
        match self.index.get(&key) {
            Some(&idx) => self.to_save[idx] = Some(entity),
            None => {
                let plan = FetchPlan::new(&key.entity);
                self.saving(entity, plan);
            }
        }
    }

    pub fn fetch_plan(&self, key: &EntityKey) -> Option<&FetchPlan> {
        self.fetch_plans.get(key)
    }

    pub fn entities_to_save(&self) -> impl Iterator<Item = &Entity> {
        self.to_save.iter().flatten()
    }

    pub fn entities_to_save_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.to_save.iter_mut().flatten()
    }

    pub fn keys_to_remove(&self) -> &[EntityKey] {
        &self.to_remove
    }

    pub fn soft_deletion(&self) -> bool {
        self.soft_deletion
    }

    pub fn set_soft_deletion(&mut self, soft_deletion: bool) {
        self.soft_deletion = soft_deletion;
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.to_remove.is_empty()
    }

    pub fn into_batch(self) -> SaveBatch {
        SaveBatch {
            to_save: self.to_save.into_iter().flatten().collect(),
            fetch_plans: self.fetch_plans,
            to_remove: self.to_remove,
            soft_deletion: self.soft_deletion,
        }
    }
}

/// Loads and saves entities
pub trait DataStore {
    fn metadata(&self) -> &Metadata;

    /// Load one entity by key; references come back as key-only stubs
    fn load(&self, key: &EntityKey, options: LoadOptions) -> Result<Option<Entity>, StoreError>;

    /// Load all entities of a class
    fn load_list(&self, entity: &str, options: LoadOptions) -> Result<Vec<Entity>, StoreError>;

    /// Apply a save context atomically and return the saved entities
    fn save(&mut self, context: SaveContext) -> Result<Vec<Entity>, StoreError>;

    /// Load an entity restricted to a fetch plan, expanding references the
    /// plan nests into
    fn load_graph(
        &self,
        key: &EntityKey,
        plan: &FetchPlan,
        options: LoadOptions,
    ) -> Result<Option<Entity>, StoreError> {
        let Some(mut entity) = self.load(key, options)? else {
            return Ok(None);
        };
        apply_plan(self, entity.values_mut(), plan, options)?;
        Ok(Some(entity))
    }
}

fn apply_plan<S: DataStore + ?Sized>(
    store: &S,
    values: &mut BTreeMap<String, Value>,
    plan: &FetchPlan,
    options: LoadOptions,
) -> Result<(), StoreError> {
    values.retain(|name, _| name == VERSION_PROPERTY || plan.contains(name));

    for property in &plan.properties {
        let Some(nested) = &property.plan else {
            continue;
        };
        let Some(value) = values.get_mut(&property.name) else {
            continue;
        };

        match value {
            Value::Entity(reference) => {
                let key = reference.key();
                match store.load_graph(&key, nested, options)? {
                    Some(loaded) => **reference = loaded,
                    None => log::debug!("Reference {} of '{}' not found", key, property.name),
                }
            }
            Value::Collection(items) => {
                for item in items.iter_mut() {
                    let key = item.key();
                    if let Some(loaded) = store.load_graph(&key, nested, options)? {
                        *item = loaded;
                    }
                }
            }
            Value::Embedded(embedded) => {
                apply_plan(store, embedded.values_mut(), nested, options)?;
            }
            _ => {}
        }
    }

    Ok(())
}
