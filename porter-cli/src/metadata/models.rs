//! Entity metamodel models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the optimistic-lock counter on versioned entities
pub const VERSION_PROPERTY: &str = "version";

/// Scalar data types a property can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    String,
    Integer,
    Decimal,
    Boolean,
    DateTime,
    Uuid,
}

/// Data type of an entity's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    #[default]
    Uuid,
    Integer,
    String,
}

/// Cardinality of a class-typed property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// Whether the property holds a collection
    pub fn is_many(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

/// What a property holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyRange {
    /// Scalar value
    Datatype { datatype: Datatype },
    /// Enumeration stored by its id string
    Enum { values: Vec<String> },
    /// Embedded object without identity of its own
    Embedded { class: String },
    /// Reference to independently owned entities
    Association {
        class: String,
        cardinality: Cardinality,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
    },
    /// Reference to exclusively owned entities
    Composition {
        class: String,
        cardinality: Cardinality,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
    },
}

/// Property metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMeta {
    pub name: String,
    #[serde(flatten)]
    pub range: PropertyRange,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl PropertyMeta {
    /// Scalar or enum property
    pub fn is_local(&self) -> bool {
        matches!(
            self.range,
            PropertyRange::Datatype { .. } | PropertyRange::Enum { .. }
        )
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.range, PropertyRange::Embedded { .. })
    }

    pub fn is_composition(&self) -> bool {
        matches!(self.range, PropertyRange::Composition { .. })
    }

    /// Association or composition (not embedded)
    pub fn is_reference(&self) -> bool {
        matches!(
            self.range,
            PropertyRange::Association { .. } | PropertyRange::Composition { .. }
        )
    }

    pub fn datatype(&self) -> Option<Datatype> {
        match &self.range {
            PropertyRange::Datatype { datatype } => Some(*datatype),
            _ => None,
        }
    }

    /// Target class of embedded, association and composition properties
    pub fn class(&self) -> Option<&str> {
        match &self.range {
            PropertyRange::Embedded { class }
            | PropertyRange::Association { class, .. }
            | PropertyRange::Composition { class, .. } => Some(class),
            _ => None,
        }
    }

    pub fn cardinality(&self) -> Option<Cardinality> {
        match &self.range {
            PropertyRange::Association { cardinality, .. }
            | PropertyRange::Composition { cardinality, .. } => Some(*cardinality),
            _ => None,
        }
    }

    /// Property on the target class pointing back at the owner
    pub fn inverse(&self) -> Option<&str> {
        match &self.range {
            PropertyRange::Association { inverse, .. }
            | PropertyRange::Composition { inverse, .. } => inverse.as_deref(),
            _ => None,
        }
    }
}

/// Entity class metadata
///
/// The property index is built once when the registry is loaded, so
/// name-based access during an import does not scan the property list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    #[serde(default)]
    pub id_type: IdType,
    /// Owns an integer `version` property used for optimistic locking
    #[serde(default)]
    pub versioned: bool,
    /// Removal marks the record deleted instead of dropping it
    #[serde(default)]
    pub soft_delete: bool,
    /// Can only live inside an owning entity as an embedded value
    #[serde(default)]
    pub embeddable: bool,
    /// Property rendered as `_instanceName` on export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, rename = "property")]
    pub properties: Vec<PropertyMeta>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl EntityMeta {
    pub fn new(name: impl Into<String>) -> Self {
        EntityMeta {
            name: name.into(),
            id_type: IdType::default(),
            versioned: false,
            soft_delete: false,
            embeddable: false,
            instance_name: None,
            properties: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a property, replacing any property with the same name
    pub fn with_property(mut self, property: PropertyMeta) -> Self {
        match self.index.get(&property.name) {
            Some(&idx) => self.properties[idx] = property,
            None => {
                self.index.insert(property.name.clone(), self.properties.len());
                self.properties.push(property);
            }
        }
        self
    }

    /// Rebuild the name index after deserialization
    pub(crate) fn reindex(&mut self) -> Result<(), String> {
        self.index.clear();
        for (idx, property) in self.properties.iter().enumerate() {
            if self.index.insert(property.name.clone(), idx).is_some() {
                return Err(property.name.clone());
            }
        }
        Ok(())
    }

    /// Find a property by name
    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.index.get(name).map(|&idx| &self.properties[idx])
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Scalar and enum properties in declaration order
    pub fn local_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.is_local())
    }
}

impl PartialEq for EntityMeta {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.id_type == other.id_type
            && self.versioned == other.versioned
            && self.soft_delete == other.soft_delete
            && self.embeddable == other.embeddable
            && self.instance_name == other.instance_name
            && self.properties == other.properties
    }
}

/// One entity definition as read from a definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Higher order replaces lower order definitions of the same entity
    #[serde(default)]
    pub order: i32,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

/// A definition file: a list of `[[entity]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionFile {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityDefinition>,
}

impl PropertyMeta {
    pub fn datatype_property(name: impl Into<String>, datatype: Datatype) -> Self {
        PropertyMeta {
            name: name.into(),
            range: PropertyRange::Datatype { datatype },
            required: false,
            max_length: None,
        }
    }

    pub fn enum_property(name: impl Into<String>, values: &[&str]) -> Self {
        PropertyMeta {
            name: name.into(),
            range: PropertyRange::Enum {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
            required: false,
            max_length: None,
        }
    }

    pub fn embedded(name: impl Into<String>, class: impl Into<String>) -> Self {
        PropertyMeta {
            name: name.into(),
            range: PropertyRange::Embedded {
                class: class.into(),
            },
            required: false,
            max_length: None,
        }
    }

    pub fn association(
        name: impl Into<String>,
        class: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        PropertyMeta {
            name: name.into(),
            range: PropertyRange::Association {
                class: class.into(),
                cardinality,
                inverse: None,
            },
            required: false,
            max_length: None,
        }
    }

    pub fn composition(
        name: impl Into<String>,
        class: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        PropertyMeta {
            name: name.into(),
            range: PropertyRange::Composition {
                class: class.into(),
                cardinality,
                inverse: None,
            },
            required: false,
            max_length: None,
        }
    }

    /// Set the inverse property of an association or composition
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        match &mut self.range {
            PropertyRange::Association { inverse: inv, .. }
            | PropertyRange::Composition { inverse: inv, .. } => *inv = Some(inverse.into()),
            _ => {}
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}
