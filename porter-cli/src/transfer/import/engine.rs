//! Two-phase import of detached entity graphs
//!
//! Phase one merges every source entity into its destination counterpart,
//! recursing along the import view and queueing references that have no
//! sub-view. Phase two resolves the queued references once every entity of the
//! batch is registered, so references forward in the batch resolve. The result
//! is a [`SaveContext`] ready to be saved in one call.

use std::collections::HashSet;

use super::context::{LoadedEntities, Owner, ReferenceInfo};
use super::hooks::RowLevelFilter;
use crate::metadata::{Cardinality, EntityMeta, Metadata, PropertyMeta, PropertyRange, VERSION_PROPERTY};
use crate::store::{DataStore, LoadOptions, SaveContext};
use crate::transfer::compare::CollectionCompare;
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::{
    embedded_holder_mut, CollectionImportPolicy, Embedded, Entity, EntityId, EntityKey,
    FetchPlan, ImportView, ImportViewProperty, PropertyAccess, ReferenceImportBehaviour, Value,
};
use crate::validation::Validator;

/// Switches for one import call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Validate every entity before saving; any violation aborts the import
    pub validate: bool,
    /// Copy the source `version` onto the destination
    pub optimistic_locking: bool,
}

/// The property being merged and where it lives
struct PropertyTarget<'p> {
    holder_class: &'p str,
    property: &'p PropertyMeta,
    view_property: &'p ImportViewProperty,
    owner: &'p Owner,
}

impl PropertyTarget<'_> {
    fn name(&self) -> &str {
        &self.view_property.name
    }

    fn path(&self) -> String {
        format!("{}.{}", self.holder_class, self.view_property.name)
    }
}

/// Collection members gathered while comparing
struct Members<'s, 'a> {
    session: &'s mut ImportSession<'a>,
    items: Vec<Entity>,
}

impl Members<'_, '_> {
    /// Import a member along its view and keep a reference to the result
    fn merge(
        &mut self,
        src: &Entity,
        view: &ImportView,
        inverse: Option<&str>,
        owner: &EntityKey,
    ) -> TransferResult<()> {
        let key = self.session.import_entity(src, view)?;
        if let Some(inverse) = inverse {
            if let Some(member) = self.session.save_context.get_mut(&key) {
                member.set(inverse, Value::reference(owner));
            }
        }
        self.items.push(Entity::reference(&key));
        Ok(())
    }

    /// Resolve an existing member and keep a reference to it
    fn link(
        &mut self,
        reference: &Entity,
        behaviour: ReferenceImportBehaviour,
        path: &str,
    ) -> TransferResult<()> {
        if let Some(key) = self.session.find_reference_entity(reference, behaviour, path)? {
            self.items.push(Entity::reference(&key));
        }
        Ok(())
    }
}

/// State of one import call
pub struct ImportSession<'a> {
    store: &'a dyn DataStore,
    metadata: &'a Metadata,
    filter: &'a dyn RowLevelFilter,
    options: ImportOptions,
    save_context: SaveContext,
    references: Vec<ReferenceInfo>,
    loaded: LoadedEntities,
}

impl<'a> ImportSession<'a> {
    pub fn new(
        store: &'a dyn DataStore,
        filter: &'a dyn RowLevelFilter,
        options: ImportOptions,
    ) -> Self {
        ImportSession {
            store,
            metadata: store.metadata(),
            filter,
            options,
            save_context: SaveContext::new(),
            references: Vec::new(),
            loaded: LoadedEntities::new(),
        }
    }

    /// Run both phases and finalize; returns the batch to save
    pub fn run(
        mut self,
        entities: &[Entity],
        view: &ImportView,
        validator: Option<&dyn Validator>,
    ) -> TransferResult<SaveContext> {
        let references = self.merge_all(entities, view)?;
        self.resolve_all(references)?;
        self.finish(validator)
    }

    /// Phase one: merge every source entity, returning the deferred references
    pub fn merge_all(
        &mut self,
        entities: &[Entity],
        view: &ImportView,
    ) -> TransferResult<Vec<ReferenceInfo>> {
        for entity in entities {
            if entity.entity_name() != view.entity {
                return Err(TransferError::TypeMismatch {
                    property: entity.key().to_string(),
                    expected: format!("entity {}", view.entity),
                    actual: format!("entity {}", entity.entity_name()),
                });
            }
            self.import_entity(entity, view)?;
        }
        Ok(std::mem::take(&mut self.references))
    }

    /// Phase two: resolve deferred references against the batch and the store
    pub fn resolve_all(&mut self, references: Vec<ReferenceInfo>) -> TransferResult<()> {
        log::debug!("Resolving {} deferred references", references.len());
        for info in references {
            self.process_reference_info(info)?;
        }
        Ok(())
    }

    /// Merge one source entity into its destination, recursively
    pub fn import_entity(&mut self, src: &Entity, view: &ImportView) -> TransferResult<EntityKey> {
        let metadata = self.metadata;
        let key = src.key();
        let meta = metadata.class_nn(&key.entity)?;

        let mut dst = match self.save_context.checkout(&key) {
            Some(dst) => dst,
            None if self.save_context.contains(&key) => {
                log::debug!("{} is already being merged", key);
                return Ok(key);
            }
            None => {
                self.save_context
                    .reserve(key.clone(), FetchPlan::from_import_view(view));
                match self.store.load(&key, LoadOptions::including_deleted())? {
                    Some(existing) => {
                        log::debug!("Merging into existing {}", key);
                        existing
                    }
                    None => {
                        log::debug!("Creating {}", key);
                        metadata.create(&key.entity, key.id.clone())?
                    }
                }
            }
        };

        let owner = Owner::root(key.clone());
        self.merge_properties(src, &mut dst, view, meta, &owner)?;

        if self.options.optimistic_locking && meta.versioned {
            if let Some(version) = src.get(VERSION_PROPERTY) {
                dst.set(VERSION_PROPERTY, version.clone());
            }
        }

        self.save_context.checkin(dst);
        Ok(key)
    }

    fn merge_properties(
        &mut self,
        src: &dyn PropertyAccess,
        dst: &mut dyn PropertyAccess,
        view: &ImportView,
        meta: &EntityMeta,
        owner: &Owner,
    ) -> TransferResult<()> {
        let metadata = self.metadata;

        for view_property in &view.properties {
            let name = view_property.name.as_str();
            let property = metadata.property(&meta.name, name)?;
            if meta.versioned && name == VERSION_PROPERTY {
                continue;
            }
            // Not loaded in the source: leave the destination alone
            let Some(src_value) = src.get(name) else {
                continue;
            };

            let target = PropertyTarget {
                holder_class: &meta.name,
                property,
                view_property,
                owner,
            };

            match &property.range {
                PropertyRange::Datatype { .. } | PropertyRange::Enum { .. } => {
                    dst.set(name, src_value.clone());
                }
                PropertyRange::Embedded { class } => {
                    self.merge_embedded(dst, &target, class, src_value)?;
                }
                PropertyRange::Association { cardinality, .. }
                | PropertyRange::Composition { cardinality, .. } => match cardinality {
                    Cardinality::ManyToOne | Cardinality::OneToOne => {
                        self.import_to_one(dst, &target, src_value)?;
                    }
                    Cardinality::OneToMany => {
                        self.import_one_to_many(src, dst, &target, src_value)?;
                    }
                    Cardinality::ManyToMany => {
                        self.import_many_to_many(src, dst, &target, src_value)?;
                    }
                },
            }
        }

        Ok(())
    }

    fn merge_embedded(
        &mut self,
        dst: &mut dyn PropertyAccess,
        target: &PropertyTarget,
        class: &str,
        src_value: &Value,
    ) -> TransferResult<()> {
        let metadata = self.metadata;
        let name = target.name();

        match (src_value, &target.view_property.view) {
            (Value::Null, _) => dst.set(name, Value::Null),
            (Value::Embedded(src_embedded), Some(sub_view)) => {
                let embedded_meta = metadata.class_nn(class)?;
                let mut dst_embedded = match dst.take(name) {
                    Some(Value::Embedded(existing)) => *existing,
                    _ => Embedded::new(class),
                };
                let nested_owner = target.owner.descend(name);
                self.merge_properties(
                    &**src_embedded,
                    &mut dst_embedded,
                    sub_view,
                    embedded_meta,
                    &nested_owner,
                )?;
                dst.set(name, Value::Embedded(Box::new(dst_embedded)));
            }
            (Value::Embedded(_), None) => {
                log::debug!("Embedded {} has no view, skipped", target.path());
            }
            (other, _) => return Err(mismatch(target, "an embedded object", other)),
        }

        Ok(())
    }

    fn import_to_one(
        &mut self,
        dst: &mut dyn PropertyAccess,
        target: &PropertyTarget,
        src_value: &Value,
    ) -> TransferResult<()> {
        let name = target.name();
        let prev_value = dst.get(name).cloned().unwrap_or_default();

        let Some(sub_view) = &target.view_property.view else {
            self.defer(target, src_value.clone(), prev_value, HashSet::new());
            return Ok(());
        };

        let composition = target.property.is_composition();
        match src_value {
            Value::Null => {
                if composition {
                    if let Some(prev) = prev_value.as_entity() {
                        self.save_context.removing(prev.key());
                    }
                }
                dst.set(name, Value::Null);
            }
            Value::Entity(src_target) => {
                let key = self.import_entity(src_target, sub_view)?;
                if composition {
                    if let Some(prev) = prev_value.as_entity().filter(|p| p.key() != key) {
                        self.save_context.removing(prev.key());
                    }
                }
                dst.set(name, Value::reference(&key));
            }
            other => return Err(mismatch(target, "an entity", other)),
        }

        Ok(())
    }

    fn import_one_to_many(
        &mut self,
        src: &dyn PropertyAccess,
        dst: &mut dyn PropertyAccess,
        target: &PropertyTarget,
        src_value: &Value,
    ) -> TransferResult<()> {
        let name = target.name();
        let Some(sub_view) = &target.view_property.view else {
            log::warn!("One-to-many property {} has no view, skipped", target.path());
            return Ok(());
        };

        let src_items = src_value
            .as_collection()
            .ok_or_else(|| mismatch(target, "a collection", src_value))?;
        let dst_value = dst.get(name).cloned().unwrap_or_default();
        let dst_items = dst_value.as_collection().unwrap_or(&[]);

        let filtered = self.filtered_ids(src, &*dst, name);
        let inverse = target.property.inverse();
        let owner_key = &target.owner.key;
        let policy = target.view_property.collection_import_policy;

        let mut members = Members {
            session: &mut *self,
            items: Vec::with_capacity(src_items.len()),
        };
        CollectionCompare::<Entity, Entity, Members<'_, 'a>, TransferError>::new()
            .on_create(|m, s| m.merge(s, sub_view, inverse, owner_key))
            .on_update(|m, s, _| m.merge(s, sub_view, inverse, owner_key))
            .on_delete(|m, d| {
                if policy == CollectionImportPolicy::RemoveAbsentItems && !filtered.contains(d.id()) {
                    m.session.save_context.removing(d.key());
                } else {
                    m.items.push(d.to_reference());
                }
                Ok(())
            })
            .compare(Some(src_items), Some(dst_items), &mut members)?;

        dst.set(name, Value::Collection(members.items));
        Ok(())
    }

    fn import_many_to_many(
        &mut self,
        src: &dyn PropertyAccess,
        dst: &mut dyn PropertyAccess,
        target: &PropertyTarget,
        src_value: &Value,
    ) -> TransferResult<()> {
        let name = target.name();
        let src_items = src_value
            .as_collection()
            .ok_or_else(|| mismatch(target, "a collection", src_value))?;
        let prev_value = dst.get(name).cloned().unwrap_or_default();
        let filtered = self.filtered_ids(src, &*dst, name);

        let Some(sub_view) = &target.view_property.view else {
            self.defer(target, src_value.clone(), prev_value, filtered);
            return Ok(());
        };

        let keep_absent =
            target.view_property.collection_import_policy == CollectionImportPolicy::KeepAbsentItems;
        let dst_items = prev_value.as_collection().unwrap_or(&[]);
        let owner_key = &target.owner.key;
        let path = target.path();

        let mut members = Members {
            session: &mut *self,
            items: Vec::with_capacity(src_items.len()),
        };
        CollectionCompare::<Entity, Entity, Members<'_, 'a>, TransferError>::new()
            .on_create(|m, s| m.merge(s, sub_view, None, owner_key))
            .on_update(|m, s, _| m.merge(s, sub_view, None, owner_key))
            .on_delete(|m, d| {
                if keep_absent || filtered.contains(d.id()) {
                    m.items.push(d.to_reference());
                } else {
                    log::debug!("Unlinking {} from {}", d.key(), path);
                }
                Ok(())
            })
            .compare(Some(src_items), Some(dst_items), &mut members)?;

        dst.set(name, Value::Collection(members.items));
        Ok(())
    }

    fn defer(
        &mut self,
        target: &PropertyTarget,
        value: Value,
        prev_value: Value,
        filtered: HashSet<EntityId>,
    ) {
        log::debug!("Deferring {} of {}", target.path(), target.owner.key);
        self.references.push(ReferenceInfo {
            owner: target.owner.clone(),
            holder_class: target.holder_class.to_string(),
            property: target.view_property.clone(),
            value,
            prev_value,
            filtered,
        });
    }

    /// Filtered ids of both sides, computed independently
    fn filtered_ids(
        &self,
        src: &dyn PropertyAccess,
        dst: &dyn PropertyAccess,
        property: &str,
    ) -> HashSet<EntityId> {
        let mut ids = self.filter.filtered_ids(dst, property);
        ids.extend(self.filter.filtered_ids(src, property));
        ids
    }

    fn process_reference_info(&mut self, info: ReferenceInfo) -> TransferResult<()> {
        let metadata = self.metadata;
        let property = metadata.property(&info.holder_class, &info.property.name)?;
        let behaviour = info.property.reference_import_behaviour;
        let path = info.property_path();

        let new_value = if property.cardinality() == Some(Cardinality::ManyToMany) {
            let src_items = info.value.as_collection().ok_or_else(|| TransferError::TypeMismatch {
                property: path.clone(),
                expected: "a collection".to_string(),
                actual: info.value.kind().to_string(),
            })?;
            let dst_items = info.prev_value.as_collection().unwrap_or(&[]);
            let keep_absent =
                info.property.collection_import_policy == CollectionImportPolicy::KeepAbsentItems;

            let mut members = Members {
                session: &mut *self,
                items: Vec::with_capacity(src_items.len()),
            };
            CollectionCompare::<Entity, Entity, Members<'_, 'a>, TransferError>::new()
                .on_create(|m, s| m.link(s, behaviour, &path))
                .on_update(|m, s, _| m.link(s, behaviour, &path))
                .on_delete(|m, d| {
                    if keep_absent || info.filtered.contains(d.id()) {
                        m.items.push(d.to_reference());
                    } else {
                        log::debug!("Unlinking {} from {}", d.key(), path);
                    }
                    Ok(())
                })
                .compare(Some(src_items), Some(dst_items), &mut members)?;
            Value::Collection(members.items)
        } else {
            match &info.value {
                Value::Null => {
                    if property.is_composition() {
                        if let Some(prev) = info.prev_value.as_entity() {
                            self.save_context.removing(prev.key());
                        }
                    }
                    Value::Null
                }
                Value::Entity(reference) => {
                    match self.find_reference_entity(reference, behaviour, &path)? {
                        Some(key) => Value::reference(&key),
                        None => Value::Null,
                    }
                }
                other => {
                    return Err(TransferError::TypeMismatch {
                        property: path,
                        expected: "an entity".to_string(),
                        actual: other.kind().to_string(),
                    });
                }
            }
        };

        let Some(owner) = self.save_context.get_mut(&info.owner.key) else {
            log::warn!("Owner {} of {} is not registered, skipped", info.owner.key, path);
            return Ok(());
        };
        match embedded_holder_mut(owner, &info.owner.path) {
            Some(holder) => holder.set(&info.property.name, new_value),
            None => log::warn!("Embedded holder of {} on {} is gone, skipped", path, info.owner.key),
        }
        Ok(())
    }

    /// Resolve a possibly detached reference to an entity of this batch or of
    /// the store; `None` when missing and the behaviour ignores that
    fn find_reference_entity(
        &mut self,
        reference: &Entity,
        behaviour: ReferenceImportBehaviour,
        path: &str,
    ) -> TransferResult<Option<EntityKey>> {
        let key = reference.key();
        if self.loaded.contains(&key) || self.save_context.contains(&key) {
            return Ok(Some(key));
        }

        let plan = FetchPlan::minimal(self.metadata.class_nn(&key.entity)?);
        match self
            .store
            .load_graph(&key, &plan, LoadOptions::including_deleted())?
        {
            Some(entity) => {
                self.loaded.insert(entity);
                Ok(Some(key))
            }
            None => match behaviour {
                ReferenceImportBehaviour::ErrorOnMissing => {
                    Err(TransferError::MissingReference {
                        property: path.to_string(),
                        key,
                    })
                }
                ReferenceImportBehaviour::IgnoreMissing => {
                    log::debug!("Ignoring missing {} for {}", key, path);
                    Ok(None)
                }
            },
        }
    }

    fn finish(mut self, validator: Option<&dyn Validator>) -> TransferResult<SaveContext> {
        let metadata = self.metadata;

        for entity in self.save_context.entities_to_save_mut() {
            if entity.is_new() || !entity.is_deleted() {
                continue;
            }
            if metadata
                .class(entity.entity_name())
                .is_some_and(|meta| meta.soft_delete)
            {
                log::info!("Restoring soft-deleted {}", entity.key());
                entity.restore();
            }
        }

        if !self.save_context.keys_to_remove().is_empty() {
            self.save_context.set_soft_deletion(true);
        }

        if let Some(validator) = validator {
            let violations: Vec<_> = self
                .save_context
                .entities_to_save()
                .flat_map(|entity| validator.validate(entity))
                .collect();
            if !violations.is_empty() {
                log::warn!("Import rejected with {} violation(s)", violations.len());
                return Err(TransferError::Validation(violations));
            }
        }

        log::info!(
            "Import prepared {} entities to save, {} to remove",
            self.save_context.entities_to_save().count(),
            self.save_context.keys_to_remove().len()
        );
        Ok(self.save_context)
    }
}

fn mismatch(target: &PropertyTarget, expected: &str, actual: &Value) -> TransferError {
    TransferError::TypeMismatch {
        property: target.path(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_fixtures::{make_metadata, make_store};
    use crate::transfer::import::NoRowLevelFilter;
    use crate::store::StoreError;
    use crate::validation::MetadataValidator;
    use std::cell::Cell;
    use uuid::Uuid;

    fn make_context(
        store: &MemoryStore,
        entities: &[Entity],
        view: &ImportView,
        options: ImportOptions,
    ) -> TransferResult<SaveContext> {
        ImportSession::new(store, &NoRowLevelFilter, options).run(entities, view, None)
    }

    fn make_children_view(policy: CollectionImportPolicy) -> ImportView {
        ImportView::new("Customer")
            .add_local_property("name")
            .add_one_to_many_property(
                "children",
                ImportView::new("Child").add_local_property("title"),
                policy,
            )
    }

    fn key(entity: &str, id: &str) -> EntityKey {
        EntityKey::new(entity, id)
    }

    fn profile_id() -> EntityId {
        EntityId::Uuid(Uuid::from_u128(7))
    }

    fn make_store_with_profile() -> MemoryStore {
        let mut store = make_store();
        store.insert(
            Entity::new("Profile", profile_id()).with("bio", Value::String("hello".into())),
        );
        let mut e1 = store.record(&key("Customer", "E1")).unwrap().clone();
        e1.set(
            "profile",
            Value::Entity(Box::new(Entity::detached("Profile", profile_id()))),
        );
        store.insert(e1);
        store
    }

    fn member_ids(entity: &Entity, property: &str) -> Vec<String> {
        entity
            .get(property)
            .and_then(Value::as_collection)
            .unwrap_or(&[])
            .iter()
            .map(|e| e.id().to_string())
            .collect()
    }

    #[test]
    fn test_upsert_updates_existing_and_creates_new() {
        let store = make_store();
        let view = ImportView::new("Customer").add_local_property("name");
        let entities = vec![
            Entity::detached("Customer", "E1").with("name", Value::String("Acme".into())),
            Entity::detached("Customer", "E9").with("name", Value::String("Fresh".into())),
        ];

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();

        let e1 = ctx.get(&key("Customer", "E1")).unwrap();
        assert!(!e1.is_new());
        assert_eq!(e1.get("name").and_then(Value::as_str), Some("Acme"));
        assert_eq!(member_ids(e1, "children"), vec!["C1", "C2"]);

        let e9 = ctx.get(&key("Customer", "E9")).unwrap();
        assert!(e9.is_new());
        assert!(ctx.fetch_plan(&key("Customer", "E9")).unwrap().contains("name"));
    }

    #[test]
    fn test_not_loaded_property_left_alone() {
        let store = make_store();
        let view = ImportView::new("Customer").add_local_property("name");
        let entities = vec![Entity::detached("Customer", "E1")];

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let e1 = ctx.get(&key("Customer", "E1")).unwrap();
        assert_eq!(e1.get("name").and_then(Value::as_str), Some("Old name"));
    }

    #[test]
    fn test_version_copied_only_with_optimistic_locking() {
        let store = make_store();
        let view = ImportView::new("Customer")
            .add_local_property("name")
            .add_local_property(VERSION_PROPERTY);
        let entities = vec![Entity::detached("Customer", "E1").with(VERSION_PROPERTY, Value::Int(99))];

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().version(), Some(5));

        let options = ImportOptions {
            optimistic_locking: true,
            ..ImportOptions::default()
        };
        let ctx = make_context(&store, &entities, &view, options).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().version(), Some(99));
    }

    #[test]
    fn test_composition_null_clears_and_removes() {
        let store = make_store_with_profile();
        let profile_key = EntityKey::new("Profile", profile_id());
        let entities = vec![Entity::detached("Customer", "E1").with("profile", Value::Null)];

        let with_view = ImportView::new("Customer")
            .add_one_to_one_view("profile", ImportView::new("Profile").add_local_property("bio"));
        let ctx = make_context(&store, &entities, &with_view, ImportOptions::default()).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().get("profile"), Some(&Value::Null));
        assert!(ctx.is_removing(&profile_key));
        assert!(ctx.soft_deletion());

        let deferred = ImportView::new("Customer")
            .add_one_to_one_property("profile", ReferenceImportBehaviour::ErrorOnMissing);
        let ctx = make_context(&store, &entities, &deferred, ImportOptions::default()).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().get("profile"), Some(&Value::Null));
        assert!(ctx.is_removing(&profile_key));
    }

    #[test]
    fn test_composition_replaced_removes_previous() {
        let store = make_store_with_profile();
        let new_profile = Entity::detached("Profile", EntityId::Uuid(Uuid::from_u128(8)))
            .with("bio", Value::String("new".into()));
        let entities = vec![
            Entity::detached("Customer", "E1").with("profile", Value::Entity(Box::new(new_profile))),
        ];
        let view = ImportView::new("Customer")
            .add_one_to_one_view("profile", ImportView::new("Profile").add_local_property("bio"));

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        assert!(ctx.is_removing(&EntityKey::new("Profile", profile_id())));
        let new_key = EntityKey::new("Profile", EntityId::Uuid(Uuid::from_u128(8)));
        assert!(ctx.get(&new_key).unwrap().is_new());
    }

    #[test]
    fn test_association_null_only_clears() {
        let store = make_store();
        let entities = vec![Entity::detached("Customer", "E1").with("owner", Value::Null)];
        let view = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::ErrorOnMissing);

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().get("owner"), Some(&Value::Null));
        assert!(ctx.keys_to_remove().is_empty());
        assert!(!ctx.soft_deletion());
    }

    #[test]
    fn test_missing_reference_behaviours() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1")
                .with("owner", Value::reference(&key("User", "U404"))),
        ];

        let strict = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::ErrorOnMissing);
        match make_context(&store, &entities, &strict, ImportOptions::default()) {
            Err(TransferError::MissingReference { property, key: missing }) => {
                assert_eq!(property, "Customer.owner");
                assert_eq!(missing, key("User", "U404"));
            }
            other => panic!("expected missing reference, got {:?}", other.map(|_| ())),
        }

        let lenient = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::IgnoreMissing);
        let ctx = make_context(&store, &entities, &lenient, ImportOptions::default()).unwrap();
        assert_eq!(ctx.get(&key("Customer", "E1")).unwrap().get("owner"), Some(&Value::Null));
    }

    #[test]
    fn test_existing_reference_resolved() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1").with("owner", Value::reference(&key("User", "U2"))),
        ];
        let view = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::ErrorOnMissing);

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let owner = ctx
            .get(&key("Customer", "E1"))
            .unwrap()
            .get("owner")
            .and_then(Value::as_entity)
            .unwrap();
        assert_eq!(owner.key(), key("User", "U2"));
        assert!(!ctx.contains(&key("User", "U2")));
    }

    /// Counts store loads of one entity class
    struct CountingStore {
        inner: MemoryStore,
        entity: &'static str,
        loads: Cell<usize>,
    }

    impl DataStore for CountingStore {
        fn metadata(&self) -> &Metadata {
            self.inner.metadata()
        }

        fn load(&self, key: &EntityKey, options: LoadOptions) -> Result<Option<Entity>, StoreError> {
            if key.entity == self.entity {
                self.loads.set(self.loads.get() + 1);
            }
            self.inner.load(key, options)
        }

        fn load_list(&self, entity: &str, options: LoadOptions) -> Result<Vec<Entity>, StoreError> {
            self.inner.load_list(entity, options)
        }

        fn save(&mut self, context: SaveContext) -> Result<Vec<Entity>, StoreError> {
            self.inner.save(context)
        }
    }

    #[test]
    fn test_shared_reference_loaded_once() {
        let store = CountingStore {
            inner: make_store(),
            entity: "User",
            loads: Cell::new(0),
        };
        let entities = vec![
            Entity::detached("Customer", "E1").with("owner", Value::reference(&key("User", "U2"))),
            Entity::detached("Customer", "E8").with("owner", Value::reference(&key("User", "U2"))),
        ];
        let view = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::ErrorOnMissing);

        let mut session = ImportSession::new(&store, &NoRowLevelFilter, ImportOptions::default());
        let references = session.merge_all(&entities, &view).unwrap();
        assert_eq!(references.len(), 2);
        session.resolve_all(references).unwrap();

        assert_eq!(store.loads.get(), 1);
        assert_eq!(session.loaded.len(), 1);
        assert_eq!(
            session
                .loaded
                .get(&key("User", "U2"))
                .and_then(|u| u.get("login"))
                .and_then(Value::as_str),
            Some("guest")
        );
        for id in ["E1", "E8"] {
            let owner = session
                .save_context
                .get(&key("Customer", id))
                .and_then(|c| c.get("owner"))
                .and_then(Value::as_entity)
                .map(Entity::key);
            assert_eq!(owner, Some(key("User", "U2")));
        }
    }

    #[test]
    fn test_forward_reference_within_batch() {
        let store = make_store();
        let child = Entity::detached("Child", "C7")
            .with("title", Value::String("seven".into()))
            .with("parent", Value::reference(&key("Customer", "E7")));
        let entities = vec![
            Entity::detached("Customer", "E7")
                .with("name", Value::String("Seven".into()))
                .with("children", Value::Collection(vec![child])),
        ];
        let view = ImportView::new("Customer").add_local_property("name").add_one_to_many_property(
            "children",
            ImportView::new("Child")
                .add_local_property("title")
                .add_many_to_one_property("parent", ReferenceImportBehaviour::ErrorOnMissing),
            CollectionImportPolicy::KeepAbsentItems,
        );

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let c7 = ctx.get(&key("Child", "C7")).unwrap();
        assert_eq!(
            c7.get("parent").and_then(Value::as_entity).map(Entity::key),
            Some(key("Customer", "E7"))
        );
    }

    #[test]
    fn test_one_to_many_remove_absent_items() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1")
                .with("name", Value::String("Acme".into()))
                .with(
                    "children",
                    Value::Collection(vec![
                        Entity::detached("Child", "C1").with("title", Value::String("x".into())),
                    ]),
                ),
        ];
        let view = make_children_view(CollectionImportPolicy::RemoveAbsentItems);

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let e1 = ctx.get(&key("Customer", "E1")).unwrap();
        assert_eq!(member_ids(e1, "children"), vec!["C1"]);

        let c1 = ctx.get(&key("Child", "C1")).unwrap();
        assert_eq!(c1.get("title").and_then(Value::as_str), Some("x"));
        assert_eq!(
            c1.get("parent").and_then(Value::as_entity).map(Entity::key),
            Some(key("Customer", "E1"))
        );
        assert_eq!(ctx.keys_to_remove(), &[key("Child", "C2")]);
        assert!(ctx.soft_deletion());
    }

    #[test]
    fn test_one_to_many_keep_absent_items() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1").with(
                "children",
                Value::Collection(vec![Entity::detached("Child", "C3")]),
            ),
        ];
        let view = make_children_view(CollectionImportPolicy::KeepAbsentItems);

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let e1 = ctx.get(&key("Customer", "E1")).unwrap();
        assert_eq!(member_ids(e1, "children"), vec!["C3", "C1", "C2"]);
        assert!(ctx.keys_to_remove().is_empty());
        assert!(ctx.get(&key("Child", "C3")).unwrap().is_new());
    }

    #[test]
    fn test_null_collection_counts_as_empty() {
        let store = make_store();
        let entities = vec![Entity::detached("Customer", "E1").with("children", Value::Null)];
        let view = make_children_view(CollectionImportPolicy::RemoveAbsentItems);

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        assert_eq!(ctx.keys_to_remove().len(), 2);
    }

    #[test]
    fn test_row_level_filter_protects_members() {
        struct HideSecond;
        impl RowLevelFilter for HideSecond {
            fn filtered_ids(&self, _holder: &dyn PropertyAccess, _property: &str) -> HashSet<EntityId> {
                HashSet::from([EntityId::from("C2")])
            }
        }

        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1")
                .with("children", Value::Collection(vec![Entity::detached("Child", "C1")])),
        ];
        let view = make_children_view(CollectionImportPolicy::RemoveAbsentItems);

        let ctx = ImportSession::new(&store, &HideSecond, ImportOptions::default())
            .run(&entities, &view, None)
            .unwrap();
        assert!(ctx.keys_to_remove().is_empty());
        assert_eq!(member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "children"), vec!["C1", "C2"]);
    }

    #[test]
    fn test_row_level_filter_sides_united_for_many_to_many() {
        // The stored customer has `name` loaded, the detached source does not
        struct HidePerSide;
        impl RowLevelFilter for HidePerSide {
            fn filtered_ids(&self, holder: &dyn PropertyAccess, _property: &str) -> HashSet<EntityId> {
                if holder.is_loaded("name") {
                    HashSet::from([EntityId::from("T1")])
                } else {
                    HashSet::from([EntityId::from("T2")])
                }
            }
        }

        let mut store = make_store();
        store.insert(Entity::new("Tag", "T3").with("label", Value::String("green".into())));
        let mut e1 = store.record(&key("Customer", "E1")).unwrap().clone();
        e1.set(
            "tags",
            Value::Collection(vec![
                Entity::detached("Tag", "T1"),
                Entity::detached("Tag", "T2"),
                Entity::detached("Tag", "T3"),
            ]),
        );
        store.insert(e1);

        let entities = vec![Entity::detached("Customer", "E1").with("tags", Value::Collection(vec![]))];
        let deferred = ImportView::new("Customer").add_many_to_many_property(
            "tags",
            ReferenceImportBehaviour::ErrorOnMissing,
            CollectionImportPolicy::RemoveAbsentItems,
        );
        let merged = ImportView::new("Customer").add_many_to_many_view(
            "tags",
            ImportView::new("Tag").add_local_property("label"),
            CollectionImportPolicy::RemoveAbsentItems,
        );

        for view in [deferred, merged] {
            let ctx = ImportSession::new(&store, &HidePerSide, ImportOptions::default())
                .run(&entities, &view, None)
                .unwrap();
            assert_eq!(
                member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "tags"),
                vec!["T1", "T2"]
            );
            assert!(ctx.keys_to_remove().is_empty());
        }
    }

    #[test]
    fn test_many_to_many_link_and_unlink() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1")
                .with("tags", Value::Collection(vec![Entity::detached("Tag", "T2")])),
        ];

        let remove = ImportView::new("Customer").add_many_to_many_property(
            "tags",
            ReferenceImportBehaviour::ErrorOnMissing,
            CollectionImportPolicy::RemoveAbsentItems,
        );
        let ctx = make_context(&store, &entities, &remove, ImportOptions::default()).unwrap();
        assert_eq!(member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "tags"), vec!["T2"]);
        assert!(ctx.keys_to_remove().is_empty());

        let keep = ImportView::new("Customer").add_many_to_many_property(
            "tags",
            ReferenceImportBehaviour::ErrorOnMissing,
            CollectionImportPolicy::KeepAbsentItems,
        );
        let ctx = make_context(&store, &entities, &keep, ImportOptions::default()).unwrap();
        assert_eq!(member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "tags"), vec!["T2", "T1"]);
    }

    #[test]
    fn test_many_to_many_missing_member() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1").with(
                "tags",
                Value::Collection(vec![Entity::detached("Tag", "T1"), Entity::detached("Tag", "T404")]),
            ),
        ];

        let lenient = ImportView::new("Customer").add_many_to_many_property(
            "tags",
            ReferenceImportBehaviour::IgnoreMissing,
            CollectionImportPolicy::RemoveAbsentItems,
        );
        let ctx = make_context(&store, &entities, &lenient, ImportOptions::default()).unwrap();
        assert_eq!(member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "tags"), vec!["T1"]);

        let strict = ImportView::new("Customer").add_many_to_many_property(
            "tags",
            ReferenceImportBehaviour::ErrorOnMissing,
            CollectionImportPolicy::RemoveAbsentItems,
        );
        assert!(matches!(
            make_context(&store, &entities, &strict, ImportOptions::default()),
            Err(TransferError::MissingReference { .. })
        ));
    }

    #[test]
    fn test_many_to_many_with_view_merges_members() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1").with(
                "tags",
                Value::Collection(vec![
                    Entity::detached("Tag", "T9").with("label", Value::String("green".into())),
                ]),
            ),
        ];
        let view = ImportView::new("Customer").add_many_to_many_view(
            "tags",
            ImportView::new("Tag").add_local_property("label"),
            CollectionImportPolicy::RemoveAbsentItems,
        );

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        assert_eq!(member_ids(ctx.get(&key("Customer", "E1")).unwrap(), "tags"), vec!["T9"]);
        assert!(ctx.get(&key("Tag", "T9")).unwrap().is_new());
        assert!(ctx.keys_to_remove().is_empty());
    }

    #[test]
    fn test_embedded_merge_keeps_unviewed_fields() {
        let store = make_store();
        let entities = vec![Entity::detached("Customer", "E1").with(
            "address",
            Value::Embedded(Box::new(
                Embedded::new("Address")
                    .with("city", Value::String("Bergen".into()))
                    .with("zip", Value::String("5003".into())),
            )),
        )];
        let view = ImportView::new("Customer")
            .add_embedded_property("address", ImportView::new("Address").add_local_property("city"));

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let address = ctx
            .get(&key("Customer", "E1"))
            .unwrap()
            .get("address")
            .and_then(Value::as_embedded)
            .unwrap();
        assert_eq!(address.get("city").and_then(Value::as_str), Some("Bergen"));
        assert_eq!(address.get("zip").and_then(Value::as_str), Some("0150"));
    }

    #[test]
    fn test_soft_deleted_entity_restored() {
        let mut store = make_store();
        let mut deleted = Entity::new("Customer", "E5").with("name", Value::String("Gone".into()));
        deleted.mark_deleted(chrono::Utc::now(), None);
        store.insert(deleted);

        let view = ImportView::new("Customer").add_local_property("name");
        let entities = vec![Entity::detached("Customer", "E5").with("name", Value::String("Back".into()))];

        let ctx = make_context(&store, &entities, &view, ImportOptions::default()).unwrap();
        let e5 = ctx.get(&key("Customer", "E5")).unwrap();
        assert!(!e5.is_new());
        assert!(!e5.is_deleted());
    }

    #[test]
    fn test_validation_aggregates_violations() {
        let store = make_store();
        let validator = MetadataValidator::new(make_metadata());
        let long = "x".repeat(41);
        let entities = vec![
            Entity::detached("Customer", "E1").with("name", Value::String(long.clone())),
            Entity::detached("Customer", "E2").with("name", Value::String(long)),
        ];
        let view = ImportView::new("Customer").add_local_property("name");

        let result = ImportSession::new(&store, &NoRowLevelFilter, ImportOptions::default())
            .run(&entities, &view, Some(&validator));
        match result {
            Err(TransferError::Validation(violations)) => assert_eq!(violations.len(), 2),
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_view_class_must_match() {
        let store = make_store();
        let view = ImportView::new("Customer");
        let entities = vec![Entity::detached("Tag", "T1")];
        assert!(matches!(
            make_context(&store, &entities, &view, ImportOptions::default()),
            Err(TransferError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_phases_can_run_separately() {
        let store = make_store();
        let entities = vec![
            Entity::detached("Customer", "E1").with("owner", Value::reference(&key("User", "U2"))),
        ];
        let view = ImportView::new("Customer")
            .add_many_to_one_property("owner", ReferenceImportBehaviour::ErrorOnMissing);

        let mut session = ImportSession::new(&store, &NoRowLevelFilter, ImportOptions::default());
        let references = session.merge_all(&entities, &view).unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].property_path(), "Customer.owner");
        session.resolve_all(references).unwrap();
    }
}
