//! Import/export entry points over a data store

use std::sync::Arc;

use super::archive::{read_json_entries, write_single_entry, ENTITIES_ENTRY};
use super::error::{TransferError, TransferResult};
use super::import::{
    merge_views, ImportOptions, ImportPermission, ImportSession, ImportViewJsonBuilder,
    NoRowLevelFilter, PermitAll, RowLevelFilter, ViewBuildError,
};
use super::serialize::{entities_from_json, entities_to_json, SerializeOptions};
use super::types::{Entity, FetchPlan, ImportView, PropertyAccess};
use crate::metadata::Metadata;
use crate::store::{DataStore, LoadOptions};
use crate::validation::{MetadataValidator, Validator};

/// Exports entity graphs and imports detached ones into a store
pub struct EntityImportExport<S: DataStore> {
    store: S,
    metadata: Arc<Metadata>,
    validator: Box<dyn Validator>,
    filter: Box<dyn RowLevelFilter>,
    permission: Box<dyn ImportPermission>,
    serialize_options: SerializeOptions,
}

impl<S: DataStore> EntityImportExport<S> {
    pub fn new(metadata: Arc<Metadata>, store: S) -> Self {
        EntityImportExport {
            store,
            validator: Box::new(MetadataValidator::new(metadata.clone())),
            metadata,
            filter: Box::new(NoRowLevelFilter),
            permission: Box::new(PermitAll),
            serialize_options: SerializeOptions::default(),
        }
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn with_filter(mut self, filter: impl RowLevelFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_permission(mut self, permission: impl ImportPermission + 'static) -> Self {
        self.permission = Box::new(permission);
        self
    }

    pub fn with_serialize_options(mut self, options: SerializeOptions) -> Self {
        self.serialize_options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// View inference honouring the configured permission check
    pub fn view_builder(&self) -> ImportViewJsonBuilder<'_> {
        ImportViewJsonBuilder::new(&self.metadata).with_permission(&*self.permission)
    }

    /// Serialize entities to JSON
    ///
    /// With a plan every entity is reloaded at the plan's depth first, soft
    /// deleted ones included; entities no longer in the store are skipped.
    pub fn export_entities_to_json(
        &self,
        entities: &[Entity],
        plan: Option<&FetchPlan>,
    ) -> TransferResult<String> {
        let json = match plan {
            Some(plan) => {
                let reloaded = self.reload(entities, plan)?;
                entities_to_json(&self.metadata, &reloaded, self.serialize_options)?
            }
            None => entities_to_json(&self.metadata, entities, self.serialize_options)?,
        };
        log::info!("Exported {} entities", entities.len());
        Ok(json)
    }

    /// Serialize entities to a ZIP archive with a single stored entry
    pub fn export_entities_to_zip(
        &self,
        entities: &[Entity],
        plan: Option<&FetchPlan>,
    ) -> TransferResult<Vec<u8>> {
        let json = self.export_entities_to_json(entities, plan)?;
        write_single_entry(ENTITIES_ENTRY, json.as_bytes())
    }

    fn reload(&self, entities: &[Entity], plan: &FetchPlan) -> TransferResult<Vec<Entity>> {
        let mut reloaded = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.entity_name() != plan.entity {
                return Err(TransferError::TypeMismatch {
                    property: entity.key().to_string(),
                    expected: format!("entity {}", plan.entity),
                    actual: format!("entity {}", entity.entity_name()),
                });
            }
            let key = entity.key();
            match self
                .store
                .load_graph(&key, plan, LoadOptions::including_deleted())?
            {
                Some(loaded) => reloaded.push(loaded),
                None => log::warn!("{} no longer exists, not exported", key),
            }
        }
        Ok(reloaded)
    }

    /// Merge detached entities into the store along a view
    ///
    /// Everything is saved in one call; on error nothing is saved. Returns
    /// the saved entities.
    pub fn import_entities(
        &mut self,
        entities: &[Entity],
        view: &ImportView,
        options: ImportOptions,
    ) -> TransferResult<Vec<Entity>> {
        let context = {
            let validator = options.validate.then_some(&*self.validator);
            ImportSession::new(&self.store, &*self.filter, options).run(entities, view, validator)?
        };
        if context.is_empty() {
            log::info!("Nothing to import");
            return Ok(Vec::new());
        }

        let saved = self.store.save(context)?;
        log::info!("Imported {} entities", saved.len());
        Ok(saved)
    }

    /// Import a JSON document; without a view one is inferred from the document
    pub fn import_entities_from_json(
        &mut self,
        json: &str,
        view: Option<&ImportView>,
        options: ImportOptions,
    ) -> TransferResult<Vec<Entity>> {
        let entities = entities_from_json(&self.metadata, json)?;
        if entities.is_empty() {
            log::info!("Document holds no entities");
            return Ok(Vec::new());
        }

        let inferred;
        let view = match view {
            Some(view) => view,
            None => {
                inferred = self.view_builder().infer_view_from_str(json)?;
                &inferred
            }
        };
        self.import_entities(&entities, view, options)
    }

    /// Import every JSON entry of an archive as one batch
    pub fn import_entities_from_zip(
        &mut self,
        bytes: &[u8],
        view: Option<&ImportView>,
        options: ImportOptions,
    ) -> TransferResult<Vec<Entity>> {
        let mut entities = Vec::new();
        let mut inferred: Option<ImportView> = None;

        for (name, content) in read_json_entries(bytes)? {
            let batch = entities_from_json(&self.metadata, &content)?;
            log::debug!("Archive entry {} holds {} entities", name, batch.len());
            if view.is_none() && !batch.is_empty() {
                let entry_view = self.view_builder().infer_view_from_str(&content)?;
                inferred = Some(match inferred.take() {
                    Some(existing) if existing.entity != entry_view.entity => {
                        return Err(ViewBuildError::Unsupported(format!(
                            "archive mixes entity classes {} and {}",
                            existing.entity, entry_view.entity
                        ))
                        .into());
                    }
                    Some(existing) => merge_views(existing, entry_view),
                    None => entry_view,
                });
            }
            entities.extend(batch);
        }

        match view.or(inferred.as_ref()) {
            Some(view) => self.import_entities(&entities, view, options),
            None => {
                log::info!("Archive holds no entities");
                Ok(Vec::new())
            }
        }
    }
}
