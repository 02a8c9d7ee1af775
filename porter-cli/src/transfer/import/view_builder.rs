//! Import view inference from the shape of entity JSON
//!
//! Fields unknown to the metamodel or not permitted for import are left out of
//! the view. Nested objects and arrays of composed entities produce nested
//! views; references to existing entities produce leaves.

use serde_json::{Map, Value as Json};
use thiserror::Error;

use super::hooks::{ImportPermission, PermitAll};
use crate::metadata::{Cardinality, Metadata, MetadataError, PropertyRange};
use crate::transfer::serialize::{json_kind, ENTITY_NAME_FIELD, RESERVED_FIELDS};
use crate::transfer::{
    CollectionImportPolicy, ImportView, ImportViewProperty, ReferenceImportBehaviour,
};

#[derive(Debug, Error)]
pub enum ViewBuildError {
    #[error("property '{property}' expects {expected}, got {actual}")]
    ShapeMismatch {
        property: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot infer an import view: {0}")]
    Unsupported(String),
}

pub type ViewBuildResult<T> = Result<T, ViewBuildError>;

pub struct ImportViewJsonBuilder<'m> {
    metadata: &'m Metadata,
    permission: &'m dyn ImportPermission,
}

impl<'m> ImportViewJsonBuilder<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        ImportViewJsonBuilder {
            metadata,
            permission: &PermitAll,
        }
    }

    pub fn with_permission(mut self, permission: &'m dyn ImportPermission) -> Self {
        self.permission = permission;
        self
    }

    /// Infer a view for a serialized document
    pub fn infer_view_from_str(&self, json: &str) -> ViewBuildResult<ImportView> {
        let json: Json = serde_json::from_str(json)?;
        self.infer_view(&json)
    }

    /// Infer a view for an entity object or an array of entities of one class;
    /// the class is read from `_entityName`
    pub fn infer_view(&self, json: &Json) -> ViewBuildResult<ImportView> {
        match json {
            Json::Object(object) => {
                let entity = entity_name(object)?;
                self.build_from_json(object, entity)
            }
            Json::Array(items) => {
                let mut entity: Option<&str> = None;
                for item in items {
                    let object = item.as_object().ok_or_else(|| ViewBuildError::ShapeMismatch {
                        property: "document".to_string(),
                        expected: "an array of objects".to_string(),
                        actual: format!("an array containing {}", json_kind(item)),
                    })?;
                    let name = entity_name(object)?;
                    match entity {
                        Some(existing) if existing != name => {
                            return Err(ViewBuildError::Unsupported(format!(
                                "mixed entity classes {} and {}",
                                existing, name
                            )));
                        }
                        _ => entity = Some(name),
                    }
                }
                let entity = entity
                    .ok_or_else(|| ViewBuildError::Unsupported("empty array".to_string()))?;
                self.build_from_json_array(items, entity)
            }
            other => Err(ViewBuildError::ShapeMismatch {
                property: "document".to_string(),
                expected: "an object or an array".to_string(),
                actual: json_kind(other).to_string(),
            }),
        }
    }

    /// Build a view for one JSON object of class `entity`
    pub fn build_from_json(&self, json: &Map<String, Json>, entity: &str) -> ViewBuildResult<ImportView> {
        let meta = self.metadata.class_nn(entity)?;
        let mut view = ImportView::new(entity);

        for (field, value) in json {
            if RESERVED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let Some(property) = meta.property(field) else {
                log::debug!("Field {}.{} is not in the metamodel, skipped", entity, field);
                continue;
            };
            if !self.permission.is_import_permitted(meta, field) {
                log::debug!("Import of {}.{} is not permitted, skipped", entity, field);
                continue;
            }

            let path = format!("{}.{}", entity, field);
            let leaf = ImportViewProperty::new(field.as_str());

            let inferred = match &property.range {
                PropertyRange::Datatype { .. } | PropertyRange::Enum { .. } => Some(leaf),
                PropertyRange::Embedded { class } => match value {
                    Json::Object(nested) => Some(leaf.with_view(self.build_from_json(nested, class)?)),
                    Json::Null => Some(leaf),
                    other => return Err(shape_mismatch(&path, "an object", other)),
                },
                PropertyRange::Association { cardinality, .. } => match cardinality {
                    Cardinality::ManyToOne | Cardinality::OneToOne => {
                        Some(leaf.with_behaviour(ReferenceImportBehaviour::ErrorOnMissing))
                    }
                    Cardinality::ManyToMany => Some(
                        leaf.with_behaviour(ReferenceImportBehaviour::ErrorOnMissing)
                            .with_policy(CollectionImportPolicy::RemoveAbsentItems),
                    ),
                    Cardinality::OneToMany => {
                        log::debug!("One-to-many association {} is not imported", path);
                        None
                    }
                },
                PropertyRange::Composition { class, cardinality, .. } => match cardinality {
                    Cardinality::ManyToOne | Cardinality::OneToOne => match value {
                        Json::Null => Some(leaf.with_behaviour(ReferenceImportBehaviour::IgnoreMissing)),
                        Json::Object(nested) => {
                            Some(leaf.with_view(self.build_from_json(nested, class)?))
                        }
                        other => return Err(shape_mismatch(&path, "an object", other)),
                    },
                    Cardinality::OneToMany => match value {
                        Json::Array(items) => Some(
                            leaf.with_view(self.build_from_json_array(items, class)?)
                                .with_policy(CollectionImportPolicy::RemoveAbsentItems),
                        ),
                        Json::Null => None,
                        other => return Err(shape_mismatch(&path, "an array", other)),
                    },
                    Cardinality::ManyToMany => Some(
                        leaf.with_behaviour(ReferenceImportBehaviour::ErrorOnMissing)
                            .with_policy(CollectionImportPolicy::RemoveAbsentItems),
                    ),
                },
            };

            if let Some(property) = inferred {
                view.push_property(property);
            }
        }

        Ok(view)
    }

    /// Build one view covering every object of an array of class `entity`
    pub fn build_from_json_array(&self, items: &[Json], entity: &str) -> ViewBuildResult<ImportView> {
        let mut merged = ImportView::new(entity);
        for item in items {
            let Json::Object(object) = item else {
                return Err(shape_mismatch(entity, "an object", item));
            };
            merged = merge_views(merged, self.build_from_json(object, entity)?);
        }
        Ok(merged)
    }
}

/// Union of two views of the same class
///
/// Behaviours and policies come from `first`; nested views are merged
/// recursively and properties only one side names are kept as they are.
pub fn merge_views(mut first: ImportView, second: ImportView) -> ImportView {
    for property in second.properties {
        match first.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => {
                existing.view = match (existing.view.take(), property.view) {
                    (Some(a), Some(b)) => Some(merge_views(a, b)),
                    (a, b) => a.or(b),
                };
            }
            None => first.properties.push(property),
        }
    }
    first
}

fn entity_name(object: &Map<String, Json>) -> ViewBuildResult<&str> {
    object
        .get(ENTITY_NAME_FIELD)
        .and_then(Json::as_str)
        .ok_or_else(|| ViewBuildError::Unsupported(format!("object without {}", ENTITY_NAME_FIELD)))
}

fn shape_mismatch(property: &str, expected: &str, actual: &Json) -> ViewBuildError {
    ViewBuildError::ShapeMismatch {
        property: property.to_string(),
        expected: expected.to_string(),
        actual: json_kind(actual).to_string(),
    }
}
