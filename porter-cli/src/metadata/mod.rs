//! Entity metamodel registry
//!
//! Entity classes are read from definition files (TOML or JSON) and resolved
//! once into a [`Metadata`] registry. Later definitions of the same class
//! replace earlier ones only when their `order` is higher; two definitions
//! with the same order are a conflict.

pub mod models;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::transfer::{Entity, EntityId, PropertyAccess};

pub use models::{
    Cardinality, Datatype, DefinitionFile, EntityDefinition, EntityMeta, IdType, PropertyMeta,
    PropertyRange, VERSION_PROPERTY,
};

/// Error building or querying the metamodel
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("entity '{name}' is defined twice with the same order {order}")]
    ConflictingDefinitions { name: String, order: i32 },
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("unknown property '{property}' on entity '{entity}'")]
    UnknownProperty { entity: String, property: String },
    #[error("entity '{entity}' declares property '{property}' more than once")]
    DuplicateProperty { entity: String, property: String },
    #[error("property '{entity}.{property}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        property: String,
        target: String,
    },
    #[error("property '{entity}.{property}' embeds '{target}' which is not embeddable")]
    NotEmbeddable {
        entity: String,
        property: String,
        target: String,
    },
    #[error("property '{entity}.{property}' names inverse '{inverse}' which is not a reference on '{target}'")]
    InvalidInverse {
        entity: String,
        property: String,
        target: String,
        inverse: String,
    },
    #[error("version property of versioned entity '{entity}' must be an integer")]
    InvalidVersionProperty { entity: String },
    #[error("failed to read definition file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse definition file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Registry of entity classes
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    classes: HashMap<String, EntityMeta>,
}

impl Metadata {
    /// Build the registry from definitions, resolving duplicates by order
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = EntityDefinition>,
    ) -> Result<Self, MetadataError> {
        let mut chosen: HashMap<String, EntityDefinition> = HashMap::new();

        for definition in definitions {
            let name = definition.meta.name.clone();
            match chosen.get(&name) {
                Some(existing) if existing.order == definition.order => {
                    return Err(MetadataError::ConflictingDefinitions {
                        name,
                        order: definition.order,
                    });
                }
                Some(existing) if existing.order > definition.order => {
                    log::debug!(
                        "Entity '{}' order {} ignored, order {} already registered",
                        name,
                        definition.order,
                        existing.order
                    );
                }
                _ => {
                    chosen.insert(name, definition);
                }
            }
        }

        let mut classes = HashMap::with_capacity(chosen.len());
        for (name, definition) in chosen {
            let mut meta = definition.meta;
            meta.reindex()
                .map_err(|property| MetadataError::DuplicateProperty {
                    entity: name.clone(),
                    property,
                })?;
            if meta.versioned {
                ensure_version_property(&mut meta)?;
            }
            classes.insert(name, meta);
        }

        let metadata = Metadata { classes };
        metadata.check_references()?;
        Ok(metadata)
    }

    /// Build the registry from classes without explicit order
    pub fn from_classes(classes: impl IntoIterator<Item = EntityMeta>) -> Result<Self, MetadataError> {
        Self::from_definitions(
            classes
                .into_iter()
                .map(|meta| EntityDefinition { order: 0, meta }),
        )
    }

    /// Read all definition files and build the registry
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, MetadataError> {
        let mut definitions = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let file: DefinitionFile = if path.extension().is_some_and(|ext| ext == "json") {
                serde_json::from_str(&text).map_err(|e| MetadataError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            } else {
                toml::from_str(&text).map_err(|e| MetadataError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            };

            log::info!(
                "Loaded {} entity definitions from {}",
                file.entities.len(),
                path.display()
            );
            definitions.extend(file.entities);
        }

        Self::from_definitions(definitions)
    }

    /// Verify that every class-typed property points at something real
    fn check_references(&self) -> Result<(), MetadataError> {
        for meta in self.classes.values() {
            for property in &meta.properties {
                let Some(target_name) = property.class() else {
                    continue;
                };

                let target = self.classes.get(target_name).ok_or_else(|| {
                    MetadataError::UnknownTarget {
                        entity: meta.name.clone(),
                        property: property.name.clone(),
                        target: target_name.to_string(),
                    }
                })?;

                if property.is_embedded() && !target.embeddable {
                    return Err(MetadataError::NotEmbeddable {
                        entity: meta.name.clone(),
                        property: property.name.clone(),
                        target: target_name.to_string(),
                    });
                }

                if let Some(inverse) = property.inverse() {
                    let valid = target
                        .property(inverse)
                        .is_some_and(|p| p.is_reference() && p.class() == Some(meta.name.as_str()));
                    if !valid {
                        return Err(MetadataError::InvalidInverse {
                            entity: meta.name.clone(),
                            property: property.name.clone(),
                            target: target_name.to_string(),
                            inverse: inverse.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Find a class by name
    pub fn class(&self, name: &str) -> Option<&EntityMeta> {
        self.classes.get(name)
    }

    /// Find a class by name, failing if it is not registered
    pub fn class_nn(&self, name: &str) -> Result<&EntityMeta, MetadataError> {
        self.class(name)
            .ok_or_else(|| MetadataError::UnknownEntity(name.to_string()))
    }

    /// Find a property of a class, failing if either is unknown
    pub fn property(&self, entity: &str, property: &str) -> Result<&PropertyMeta, MetadataError> {
        self.class_nn(entity)?
            .property(property)
            .ok_or_else(|| MetadataError::UnknownProperty {
                entity: entity.to_string(),
                property: property.to_string(),
            })
    }

    /// Registered class names, sorted
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a new, not yet persisted instance with the given identity
    pub fn create(&self, entity: &str, id: EntityId) -> Result<Entity, MetadataError> {
        let meta = self.class_nn(entity)?;
        let mut instance = Entity::new(&meta.name, id);
        if meta.versioned {
            instance.set(VERSION_PROPERTY, crate::transfer::Value::Null);
        }
        Ok(instance)
    }

    /// Generate a fresh identity for a class
    ///
    /// Only UUID identities can be generated; other id types return `None`.
    pub fn generate_id(&self, entity: &str) -> Result<Option<EntityId>, MetadataError> {
        let meta = self.class_nn(entity)?;
        Ok(match meta.id_type {
            IdType::Uuid => Some(EntityId::Uuid(uuid::Uuid::new_v4())),
            IdType::Integer | IdType::String => None,
        })
    }
}

/// Versioned classes own an integer counter, declared or not
fn ensure_version_property(meta: &mut EntityMeta) -> Result<(), MetadataError> {
    match meta.property(VERSION_PROPERTY).map(|p| &p.range) {
        Some(PropertyRange::Datatype {
            datatype: Datatype::Integer,
        }) => Ok(()),
        Some(_) => Err(MetadataError::InvalidVersionProperty {
            entity: meta.name.clone(),
        }),
        None => {
            log::debug!("Adding implicit version property to '{}'", meta.name);
            meta.properties.push(PropertyMeta::datatype_property(
                VERSION_PROPERTY,
                Datatype::Integer,
            ));
            meta.reindex()
                .map_err(|property| MetadataError::DuplicateProperty {
                    entity: meta.name.clone(),
                    property,
                })
        }
    }
}
