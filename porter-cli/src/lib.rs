//! Graph-aware import and export of entities
//!
//! Entities are described by a [`metadata::Metadata`] registry, persisted
//! through a [`store::DataStore`] and moved in and out as JSON or ZIP by
//! [`transfer::EntityImportExport`].

pub mod cli;
pub mod config;
pub mod metadata;
pub mod store;
pub mod transfer;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_fixtures;
