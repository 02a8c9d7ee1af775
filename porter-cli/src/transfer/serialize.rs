//! JSON entity serialization format
//!
//! Each entity is an object carrying `_entityName` and `id`, an optional
//! `_instanceName`, soft-deletion markers and its loaded properties. To-one
//! references are nested objects, collections are arrays, embedded values are
//! nested objects without identity. An entity already written earlier in the
//! same document may be written again as `{"_entityName", "id"}` only.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};

use super::error::{TransferError, TransferResult};
use super::types::{Embedded, Entity, EntityId, EntityKey, PropertyAccess, Value};
use crate::metadata::{EntityMeta, Metadata, PropertyMeta, PropertyRange};

pub const ENTITY_NAME_FIELD: &str = "_entityName";
pub const INSTANCE_NAME_FIELD: &str = "_instanceName";
pub const ID_FIELD: &str = "id";
pub const DELETED_DATE_FIELD: &str = "deletedDate";
pub const DELETED_BY_FIELD: &str = "deletedBy";

pub(crate) const RESERVED_FIELDS: [&str; 5] = [
    ENTITY_NAME_FIELD,
    INSTANCE_NAME_FIELD,
    ID_FIELD,
    DELETED_DATE_FIELD,
    DELETED_BY_FIELD,
];

/// Output options for serialization
#[derive(Debug, Clone, Copy)]
pub struct SerializeOptions {
    /// Write repeated entities as key-only objects
    pub compact_repeated: bool,
    pub pretty: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        SerializeOptions {
            compact_repeated: true,
            pretty: false,
        }
    }
}

/// Writes entity graphs as JSON
pub struct EntityWriter<'m> {
    metadata: &'m Metadata,
    options: SerializeOptions,
    written: HashSet<EntityKey>,
}

impl<'m> EntityWriter<'m> {
    pub fn new(metadata: &'m Metadata, options: SerializeOptions) -> Self {
        EntityWriter {
            metadata,
            options,
            written: HashSet::new(),
        }
    }

    /// Serialize a list of entities as a JSON array document
    pub fn write_all(mut self, entities: &[Entity]) -> TransferResult<String> {
        let mut array = Vec::with_capacity(entities.len());
        for entity in entities {
            array.push(self.write_entity(entity)?);
        }
        let document = Json::Array(array);

        Ok(if self.options.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        })
    }

    pub fn write_entity(&mut self, entity: &Entity) -> TransferResult<Json> {
        let key = entity.key();
        let mut object = Map::new();
        object.insert(ENTITY_NAME_FIELD.to_string(), Json::String(key.entity.clone()));
        object.insert(ID_FIELD.to_string(), key.id.to_json());

        if entity.is_stub() {
            return Ok(Json::Object(object));
        }
        let repeated = !self.written.insert(key.clone());
        if repeated && self.options.compact_repeated {
            return Ok(Json::Object(object));
        }

        let meta = self.metadata.class_nn(&key.entity)?;

        if let Some(instance_name) = &meta.instance_name {
            if let Some(value) = entity.get(instance_name).filter(|v| !v.is_null()) {
                object.insert(
                    INSTANCE_NAME_FIELD.to_string(),
                    Json::String(value.to_string()),
                );
            }
        }

        if let Some(deletion) = entity.deletion() {
            object.insert(
                DELETED_DATE_FIELD.to_string(),
                Json::String(deletion.date.to_rfc3339()),
            );
            if let Some(by) = &deletion.by {
                object.insert(DELETED_BY_FIELD.to_string(), Json::String(by.clone()));
            }
        }

        self.write_properties(entity, meta, &mut object)?;
        Ok(Json::Object(object))
    }

    fn write_properties(
        &mut self,
        holder: &dyn PropertyAccess,
        meta: &EntityMeta,
        object: &mut Map<String, Json>,
    ) -> TransferResult<()> {
        for (name, value) in holder.values() {
            if meta.property(name).is_none() {
                log::debug!("Skipping unknown property {}.{} on export", meta.name, name);
                continue;
            }
            let json = self.write_value(value)?;
            object.insert(name.clone(), json);
        }
        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> TransferResult<Json> {
        Ok(match value {
            Value::Entity(entity) => self.write_entity(entity)?,
            Value::Collection(items) => {
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    array.push(self.write_entity(item)?);
                }
                Json::Array(array)
            }
            Value::Embedded(embedded) => {
                let meta = self.metadata.class_nn(embedded.entity_name())?;
                let mut object = Map::new();
                self.write_properties(&**embedded, meta, &mut object)?;
                Json::Object(object)
            }
            scalar => scalar.to_json(),
        })
    }
}

/// Reads entity graphs from JSON
///
/// Repeated entities written in compact form are replaced by a copy of the
/// full instance read earlier in the same document.
pub struct EntityReader<'m> {
    metadata: &'m Metadata,
    complete: HashMap<EntityKey, Entity>,
}

impl<'m> EntityReader<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        EntityReader {
            metadata,
            complete: HashMap::new(),
        }
    }

    /// Parse a document holding one entity object or an array of them
    pub fn read_document(mut self, json: &str) -> TransferResult<Vec<Entity>> {
        let document: Json = serde_json::from_str(json)?;
        match &document {
            Json::Array(items) => items.iter().map(|item| self.read_entity(item, None)).collect(),
            Json::Object(_) => Ok(vec![self.read_entity(&document, None)?]),
            other => Err(TransferError::Serialization(format!(
                "expected an entity object or array, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Parse one entity object; `expected` names the class when the object
    /// omits `_entityName`
    pub fn read_entity(&mut self, json: &Json, expected: Option<&str>) -> TransferResult<Entity> {
        let Json::Object(object) = json else {
            return Err(TransferError::Serialization(format!(
                "expected an entity object, got {}",
                json_kind(json)
            )));
        };

        let entity_name = match object.get(ENTITY_NAME_FIELD) {
            Some(Json::String(name)) => name.as_str(),
            Some(other) => {
                return Err(TransferError::Serialization(format!(
                    "{} must be a string, got {}",
                    ENTITY_NAME_FIELD,
                    json_kind(other)
                )));
            }
            None => expected.ok_or_else(|| {
                TransferError::Serialization(format!("entity object without {}", ENTITY_NAME_FIELD))
            })?,
        };
        let meta = self.metadata.class_nn(entity_name)?;

        let mut entity = match object.get(ID_FIELD).filter(|id| !id.is_null()) {
            Some(id) => {
                let id = EntityId::from_json(id, meta.id_type)
                    .map_err(|e| TransferError::Serialization(format!("{}: {}", meta.name, e)))?;
                Entity::detached(&meta.name, id)
            }
            None => {
                let id = self.metadata.generate_id(&meta.name)?.ok_or_else(|| {
                    TransferError::Serialization(format!("entity {} has no id", meta.name))
                })?;
                Entity::new(&meta.name, id)
            }
        };

        let is_reference_only = object
            .keys()
            .all(|k| k == ENTITY_NAME_FIELD || k == ID_FIELD || k == INSTANCE_NAME_FIELD);
        if is_reference_only {
            if let Some(complete) = self.complete.get(&entity.key()) {
                return Ok(complete.clone());
            }
        }

        if let Some(date) = object.get(DELETED_DATE_FIELD).filter(|d| !d.is_null()) {
            let date = parse_date(date)
                .map_err(|e| TransferError::Serialization(format!("{}: {}", meta.name, e)))?;
            let by = object
                .get(DELETED_BY_FIELD)
                .and_then(Json::as_str)
                .map(str::to_string);
            entity.mark_deleted(date, by);
        }

        self.read_properties(&mut entity, meta, object)?;

        if !is_reference_only {
            self.complete.insert(entity.key(), entity.clone());
        }
        Ok(entity)
    }

    fn read_properties(
        &mut self,
        holder: &mut dyn PropertyAccess,
        meta: &EntityMeta,
        object: &Map<String, Json>,
    ) -> TransferResult<()> {
        for (name, json) in object {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let Some(property) = meta.property(name) else {
                log::debug!("Ignoring unknown field {}.{}", meta.name, name);
                continue;
            };
            let value = self.read_value(meta, property, json)?;
            holder.set(name, value);
        }
        Ok(())
    }

    fn read_value(
        &mut self,
        meta: &EntityMeta,
        property: &PropertyMeta,
        json: &Json,
    ) -> TransferResult<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let path = || format!("{}.{}", meta.name, property.name);

        match &property.range {
            PropertyRange::Datatype { datatype } => Value::from_json(json, *datatype)
                .map_err(|e| TransferError::Serialization(format!("{}: {}", path(), e))),
            PropertyRange::Enum { .. } => match json {
                Json::String(s) => Ok(Value::Enum(s.clone())),
                other => Err(mismatch(path(), "an enum string", other)),
            },
            PropertyRange::Embedded { class } => {
                let Json::Object(object) = json else {
                    return Err(mismatch(path(), "an object", json));
                };
                let embedded_meta = self.metadata.class_nn(class)?;
                let mut embedded = Embedded::new(class.clone());
                self.read_properties(&mut embedded, embedded_meta, object)?;
                Ok(Value::Embedded(Box::new(embedded)))
            }
            PropertyRange::Association { class, cardinality, .. }
            | PropertyRange::Composition { class, cardinality, .. } => {
                if cardinality.is_many() {
                    let Json::Array(items) = json else {
                        return Err(mismatch(path(), "an array", json));
                    };
                    let mut entities = Vec::with_capacity(items.len());
                    for item in items {
                        entities.push(self.read_entity(item, Some(class.as_str()))?);
                    }
                    Ok(Value::Collection(entities))
                } else {
                    if !json.is_object() {
                        return Err(mismatch(path(), "an object", json));
                    }
                    Ok(Value::Entity(Box::new(self.read_entity(json, Some(class.as_str()))?)))
                }
            }
        }
    }
}

fn mismatch(property: String, expected: &str, actual: &Json) -> TransferError {
    TransferError::TypeMismatch {
        property,
        expected: expected.to_string(),
        actual: json_kind(actual).to_string(),
    }
}

fn parse_date(json: &Json) -> Result<DateTime<Utc>, String> {
    let s = json
        .as_str()
        .ok_or_else(|| format!("expected a date-time string, got {}", json))?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid date-time '{}': {}", s, e))
}

pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Serialize entities to a JSON array document
pub fn entities_to_json(
    metadata: &Metadata,
    entities: &[Entity],
    options: SerializeOptions,
) -> TransferResult<String> {
    EntityWriter::new(metadata, options).write_all(entities)
}

/// Deserialize a JSON document holding one entity or an array of entities
pub fn entities_from_json(metadata: &Metadata, json: &str) -> TransferResult<Vec<Entity>> {
    EntityReader::new(metadata).read_document(json)
}
