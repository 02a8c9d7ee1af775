//! Extension points consulted by import and view inference
//!
//! The defaults never filter and always permit.

use std::collections::HashSet;

use crate::metadata::EntityMeta;
use crate::transfer::{EntityId, PropertyAccess};

/// Row-level filtering of collection members
pub trait RowLevelFilter {
    /// Ids of collection members hidden from the caller; these are never
    /// removed or unlinked by an import
    fn filtered_ids(&self, _holder: &dyn PropertyAccess, _property: &str) -> HashSet<EntityId> {
        HashSet::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRowLevelFilter;

impl RowLevelFilter for NoRowLevelFilter {}

/// Attribute-level permission for view inference
pub trait ImportPermission {
    fn is_import_permitted(&self, _entity: &EntityMeta, _property: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl ImportPermission for PermitAll {}
