//! Constraint validation of entities before they are saved

use std::sync::Arc;

use crate::metadata::{EntityMeta, Metadata, PropertyRange, VERSION_PROPERTY};
use crate::transfer::{Entity, EntityKey, PropertyAccess, Value};

/// One violated constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    pub key: EntityKey,
    /// Property path from the entity, dotted through embedded objects
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}: {}", self.key, self.path, self.message)
    }
}

/// Checks an entity against its constraints
pub trait Validator {
    fn validate(&self, entity: &Entity) -> Vec<ConstraintViolation>;
}

/// Validator driven by the metamodel: required properties, maximum string
/// lengths and enum membership, recursing into embedded objects
#[derive(Debug, Clone)]
pub struct MetadataValidator {
    metadata: Arc<Metadata>,
}

impl MetadataValidator {
    pub fn new(metadata: Arc<Metadata>) -> Self {
        MetadataValidator { metadata }
    }

    fn check_holder(
        &self,
        key: &EntityKey,
        holder: &dyn PropertyAccess,
        meta: &EntityMeta,
        prefix: &str,
        is_new: bool,
        violations: &mut Vec<ConstraintViolation>,
    ) {
        for property in &meta.properties {
            if property.name == VERSION_PROPERTY && meta.versioned {
                continue;
            }

            let path = if prefix.is_empty() {
                property.name.clone()
            } else {
                format!("{}.{}", prefix, property.name)
            };
            let mut messages = Vec::new();
            let value = holder.get(&property.name);

            if property.required {
                let missing = match value {
                    None => is_new,
                    Some(Value::Collection(items)) => items.is_empty(),
                    Some(v) => v.is_null(),
                };
                if missing {
                    messages.push("must not be null".to_string());
                }
            }

            if let Some(value) = value {
                if let (Some(max), Value::String(s)) = (property.max_length, value) {
                    let len = s.chars().count();
                    if len > max {
                        messages.push(format!("length {} exceeds maximum {}", len, max));
                    }
                }

                match (&property.range, value) {
                    (PropertyRange::Enum { values }, Value::Enum(s) | Value::String(s)) => {
                        if !values.iter().any(|v| v == s) {
                            messages.push(format!("'{}' is not one of [{}]", s, values.join(", ")));
                        }
                    }
                    (PropertyRange::Embedded { class }, Value::Embedded(embedded)) => {
                        match self.metadata.class(class) {
                            Some(embedded_meta) => self.check_holder(
                                key,
                                &**embedded,
                                embedded_meta,
                                &path,
                                is_new,
                                violations,
                            ),
                            None => messages.push(format!("unknown embedded class '{}'", class)),
                        }
                    }
                    _ => {}
                }
            }

            violations.extend(messages.into_iter().map(|message| ConstraintViolation {
                key: key.clone(),
                path: path.clone(),
                message,
            }));
        }
    }
}

impl Validator for MetadataValidator {
    fn validate(&self, entity: &Entity) -> Vec<ConstraintViolation> {
        let key = entity.key();
        let mut violations = Vec::new();

        match self.metadata.class(entity.entity_name()) {
            Some(meta) => self.check_holder(
                &key,
                entity,
                meta,
                "",
                entity.is_new(),
                &mut violations,
            ),
            None => violations.push(ConstraintViolation {
                key,
                path: String::new(),
                message: format!("unknown entity '{}'", entity.entity_name()),
            }),
        }

        violations
    }
}
