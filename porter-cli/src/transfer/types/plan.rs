//! Fetch plans: which properties to load, and how deep

use serde::{Deserialize, Serialize};

use super::import_view::ImportView;
use crate::metadata::{EntityMeta, VERSION_PROPERTY};

/// One property of a fetch plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPlanProperty {
    pub name: String,
    /// Plan for the referenced or embedded class; `None` loads references as stubs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<FetchPlan>,
}

/// Tree of properties to materialize when loading an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPlan {
    pub entity: String,
    #[serde(default)]
    pub properties: Vec<FetchPlanProperty>,
}

impl FetchPlan {
    pub fn new(entity: impl Into<String>) -> Self {
        FetchPlan {
            entity: entity.into(),
            properties: Vec::new(),
        }
    }

    /// All scalar and enum properties of a class
    pub fn local(meta: &EntityMeta) -> Self {
        let mut plan = FetchPlan::new(&meta.name);
        for property in meta.local_properties() {
            plan = plan.add_property(&property.name);
        }
        plan
    }

    /// Just enough to display the instance
    pub fn minimal(meta: &EntityMeta) -> Self {
        let plan = FetchPlan::new(&meta.name);
        match &meta.instance_name {
            Some(name) => plan.add_property(name),
            None => plan,
        }
    }

    /// The plan an import registers with each destination entity: every
    /// property the view touches, nested where the view is nested
    pub fn from_import_view(view: &ImportView) -> Self {
        let mut plan = FetchPlan::new(&view.entity);
        for property in &view.properties {
            plan.properties.push(FetchPlanProperty {
                name: property.name.clone(),
                plan: property.view.as_ref().map(FetchPlan::from_import_view),
            });
        }
        if !plan.contains(VERSION_PROPERTY) {
            plan.properties.push(FetchPlanProperty {
                name: VERSION_PROPERTY.to_string(),
                plan: None,
            });
        }
        plan
    }

    /// Add a property without nested plan, replacing one with the same name
    pub fn add_property(self, name: &str) -> Self {
        self.add(FetchPlanProperty {
            name: name.to_string(),
            plan: None,
        })
    }

    /// Add a property loaded with a nested plan
    pub fn add_nested(self, name: &str, plan: FetchPlan) -> Self {
        self.add(FetchPlanProperty {
            name: name.to_string(),
            plan: Some(plan),
        })
    }

    fn add(mut self, property: FetchPlanProperty) -> Self {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
        self
    }

    pub fn property(&self, name: &str) -> Option<&FetchPlanProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.property(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Datatype, PropertyMeta};
    use crate::transfer::{CollectionImportPolicy, ImportView};

    #[test]
    fn test_local_plan_skips_references() {
        let mut meta = EntityMeta::new("Customer")
            .with_property(PropertyMeta::datatype_property("name", Datatype::String))
            .with_property(PropertyMeta::association(
                "owner",
                "User",
                crate::metadata::Cardinality::ManyToOne,
            ));
        meta.instance_name = Some("name".to_string());

        let plan = FetchPlan::local(&meta);
        assert!(plan.contains("name"));
        assert!(!plan.contains("owner"));

        let minimal = FetchPlan::minimal(&meta);
        assert_eq!(minimal.properties.len(), 1);
    }

    #[test]
    fn test_from_import_view_nests() {
        let child = ImportView::new("Child").add_local_property("title");
        let view = ImportView::new("Parent")
            .add_local_property("name")
            .add_one_to_many_property("children", child, CollectionImportPolicy::RemoveAbsentItems);

        let plan = FetchPlan::from_import_view(&view);
        assert!(plan.contains("name"));
        assert!(plan.contains(VERSION_PROPERTY));
        let nested = plan.property("children").and_then(|p| p.plan.as_ref()).unwrap();
        assert_eq!(nested.entity, "Child");
        assert!(nested.contains("title"));
    }

    #[test]
    fn test_add_property_replaces() {
        let plan = FetchPlan::new("Parent")
            .add_nested("children", FetchPlan::new("Child"))
            .add_property("children");
        assert_eq!(plan.properties.len(), 1);
        assert!(plan.properties[0].plan.is_none());
    }
}
