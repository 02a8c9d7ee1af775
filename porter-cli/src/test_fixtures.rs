//! Shared metamodel and seeded store for unit tests

use std::sync::Arc;

use crate::metadata::{
    Cardinality, Datatype, EntityMeta, IdType, Metadata, PropertyMeta, VERSION_PROPERTY,
};
use crate::store::MemoryStore;
use crate::transfer::{Embedded, Entity, Value};

/// Customer owns children (composition, inverse `parent`), an embedded
/// address and a one-to-one profile; it links tags many-to-many and points
/// at an owning user.
pub fn make_metadata() -> Arc<Metadata> {
    let mut user = EntityMeta::new("User")
        .with_property(PropertyMeta::datatype_property("login", Datatype::String));
    user.id_type = IdType::String;
    user.instance_name = Some("login".to_string());

    let mut address = EntityMeta::new("Address")
        .with_property(PropertyMeta::datatype_property("city", Datatype::String))
        .with_property(PropertyMeta::datatype_property("zip", Datatype::String));
    address.embeddable = true;

    let profile = EntityMeta::new("Profile")
        .with_property(PropertyMeta::datatype_property("bio", Datatype::String));

    let mut tag = EntityMeta::new("Tag")
        .with_property(PropertyMeta::datatype_property("label", Datatype::String));
    tag.id_type = IdType::String;

    let mut child = EntityMeta::new("Child")
        .with_property(PropertyMeta::datatype_property("title", Datatype::String))
        .with_property(PropertyMeta::association(
            "parent",
            "Customer",
            Cardinality::ManyToOne,
        ));
    child.id_type = IdType::String;

    let mut customer = EntityMeta::new("Customer")
        .with_property(PropertyMeta::datatype_property("name", Datatype::String).with_max_length(40))
        .with_property(PropertyMeta::datatype_property(VERSION_PROPERTY, Datatype::Integer))
        .with_property(PropertyMeta::enum_property("tier", &["gold", "silver"]))
        .with_property(PropertyMeta::embedded("address", "Address"))
        .with_property(PropertyMeta::association("owner", "User", Cardinality::ManyToOne))
        .with_property(PropertyMeta::composition("profile", "Profile", Cardinality::OneToOne))
        .with_property(
            PropertyMeta::composition("children", "Child", Cardinality::OneToMany)
                .with_inverse("parent"),
        )
        .with_property(PropertyMeta::association("tags", "Tag", Cardinality::ManyToMany));
    customer.id_type = IdType::String;
    customer.versioned = true;
    customer.soft_delete = true;
    customer.instance_name = Some("name".to_string());

    Arc::new(
        Metadata::from_classes(vec![user, address, profile, tag, child, customer])
            .expect("fixture metadata is valid"),
    )
}

/// Store with customer E1 (version 5, children C1 and C2, tag T1, owner U1),
/// users U1 and U2 and tags T1 and T2
pub fn make_store() -> MemoryStore {
    let mut store = MemoryStore::new(make_metadata());

    for (id, login) in [("U1", "admin"), ("U2", "guest")] {
        store.insert(Entity::new("User", id).with("login", Value::String(login.into())));
    }
    for (id, label) in [("T1", "red"), ("T2", "blue")] {
        store.insert(Entity::new("Tag", id).with("label", Value::String(label.into())));
    }
    for (id, title) in [("C1", "first"), ("C2", "second")] {
        store.insert(
            Entity::new("Child", id)
                .with("title", Value::String(title.into()))
                .with("parent", Value::Entity(Box::new(Entity::detached("Customer", "E1")))),
        );
    }

    store.insert(
        Entity::new("Customer", "E1")
            .with("name", Value::String("Old name".into()))
            .with(VERSION_PROPERTY, Value::Int(5))
            .with(
                "address",
                Value::Embedded(Box::new(
                    Embedded::new("Address")
                        .with("city", Value::String("Oslo".into()))
                        .with("zip", Value::String("0150".into())),
                )),
            )
            .with("owner", Value::Entity(Box::new(Entity::detached("User", "U1"))))
            .with(
                "children",
                Value::Collection(vec![
                    Entity::detached("Child", "C1"),
                    Entity::detached("Child", "C2"),
                ]),
            )
            .with("tags", Value::Collection(vec![Entity::detached("Tag", "T1")])),
    );

    store
}
