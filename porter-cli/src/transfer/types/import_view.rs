//! Import views: per-property plans for merging an entity graph

use serde::{Deserialize, Serialize};

use crate::metadata::{EntityMeta, VERSION_PROPERTY};

/// What to do when a referenced entity cannot be found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceImportBehaviour {
    /// Abort the import
    #[default]
    ErrorOnMissing,
    /// Leave the reference empty
    IgnoreMissing,
}

impl ReferenceImportBehaviour {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceImportBehaviour::ErrorOnMissing => "Error on missing",
            ReferenceImportBehaviour::IgnoreMissing => "Ignore missing",
        }
    }
}

/// What to do with destination collection items absent from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionImportPolicy {
    /// Remove (one-to-many) or unlink (many-to-many) absent items
    RemoveAbsentItems,
    /// Leave absent items in place
    #[default]
    KeepAbsentItems,
}

impl CollectionImportPolicy {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            CollectionImportPolicy::RemoveAbsentItems => "Remove absent items",
            CollectionImportPolicy::KeepAbsentItems => "Keep absent items",
        }
    }
}

/// One property of an import view
///
/// A reference property without a nested view is resolved as a reference to
/// an existing entity, not imported as a nested object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportViewProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ImportView>,
    #[serde(default)]
    pub reference_import_behaviour: ReferenceImportBehaviour,
    #[serde(default)]
    pub collection_import_policy: CollectionImportPolicy,
}

impl ImportViewProperty {
    /// Leaf property with default behaviours
    pub fn new(name: impl Into<String>) -> Self {
        ImportViewProperty {
            name: name.into(),
            view: None,
            reference_import_behaviour: ReferenceImportBehaviour::default(),
            collection_import_policy: CollectionImportPolicy::default(),
        }
    }

    pub fn with_view(mut self, view: ImportView) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_behaviour(mut self, behaviour: ReferenceImportBehaviour) -> Self {
        self.reference_import_behaviour = behaviour;
        self
    }

    pub fn with_policy(mut self, policy: CollectionImportPolicy) -> Self {
        self.collection_import_policy = policy;
        self
    }
}

/// Tree describing which parts of an entity graph to import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportView {
    /// Class the view applies to
    pub entity: String,
    #[serde(default)]
    pub properties: Vec<ImportViewProperty>,
}

impl ImportView {
    pub fn new(entity: impl Into<String>) -> Self {
        ImportView {
            entity: entity.into(),
            properties: Vec::new(),
        }
    }

    /// Add a property, replacing one with the same name in place
    pub fn add_property(mut self, property: ImportViewProperty) -> Self {
        self.push_property(property);
        self
    }

    pub(crate) fn push_property(&mut self, property: ImportViewProperty) {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Scalar or enum property
    pub fn add_local_property(self, name: &str) -> Self {
        self.add_property(ImportViewProperty::new(name))
    }

    /// All scalar and enum properties of a class except the version counter
    pub fn add_local_properties(mut self, meta: &EntityMeta) -> Self {
        for property in meta.local_properties() {
            if meta.versioned && property.name == VERSION_PROPERTY {
                continue;
            }
            self.push_property(ImportViewProperty::new(&property.name));
        }
        self
    }

    /// Many-to-one reference resolved against existing entities
    pub fn add_many_to_one_property(self, name: &str, behaviour: ReferenceImportBehaviour) -> Self {
        self.add_property(ImportViewProperty::new(name).with_behaviour(behaviour))
    }

    /// One-to-one reference resolved against existing entities
    pub fn add_one_to_one_property(self, name: &str, behaviour: ReferenceImportBehaviour) -> Self {
        self.add_property(ImportViewProperty::new(name).with_behaviour(behaviour))
    }

    /// One-to-one reference imported as a nested object
    pub fn add_one_to_one_view(self, name: &str, view: ImportView) -> Self {
        self.add_property(ImportViewProperty::new(name).with_view(view))
    }

    /// One-to-many collection imported as nested objects
    pub fn add_one_to_many_property(
        self,
        name: &str,
        view: ImportView,
        policy: CollectionImportPolicy,
    ) -> Self {
        self.add_property(
            ImportViewProperty::new(name)
                .with_view(view)
                .with_policy(policy),
        )
    }

    /// Many-to-many collection linked to existing entities
    pub fn add_many_to_many_property(
        self,
        name: &str,
        behaviour: ReferenceImportBehaviour,
        policy: CollectionImportPolicy,
    ) -> Self {
        self.add_property(
            ImportViewProperty::new(name)
                .with_behaviour(behaviour)
                .with_policy(policy),
        )
    }

    /// Many-to-many collection whose members are also merged
    pub fn add_many_to_many_view(
        self,
        name: &str,
        view: ImportView,
        policy: CollectionImportPolicy,
    ) -> Self {
        self.add_property(
            ImportViewProperty::new(name)
                .with_view(view)
                .with_policy(policy),
        )
    }

    /// Embedded object
    pub fn add_embedded_property(self, name: &str, view: ImportView) -> Self {
        self.add_property(ImportViewProperty::new(name).with_view(view))
    }

    pub fn property(&self, name: &str) -> Option<&ImportViewProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn remove_property(&mut self, name: &str) -> Option<ImportViewProperty> {
        let idx = self.properties.iter().position(|p| p.name == name)?;
        Some(self.properties.remove(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
