//! Entity graph transfer
//!
//! Export serializes entity graphs to JSON or a ZIP archive; import merges
//! detached graphs into the store along an [`ImportView`].

pub mod archive;
pub mod compare;
pub mod error;
pub mod import;
pub mod serialize;
pub mod service;
pub mod types;

pub use compare::CollectionCompare;
pub use error::{TransferError, TransferResult};
pub use import::{ImportOptions, ImportViewJsonBuilder, ViewBuildError};
pub use serialize::{entities_from_json, entities_to_json, EntityReader, EntityWriter, SerializeOptions};
pub use service::EntityImportExport;
pub use types::*;
