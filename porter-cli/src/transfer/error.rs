//! Errors surfaced by import and export

use thiserror::Error;

use super::types::EntityKey;
use crate::metadata::MetadataError;
use crate::store::StoreError;
use crate::validation::ConstraintViolation;

/// Failure of an import or export call; nothing is committed when returned
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("validation failed with {} violation(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<ConstraintViolation>),

    #[error("referenced entity {key} not found for property {property}")]
    MissingReference { property: String, key: EntityKey },

    #[error("property '{property}' expects {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: String,
        actual: String,
    },

    #[error("malformed entity JSON: {0}")]
    Serialization(String),

    #[error("malformed archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ViewBuild(#[from] super::import::ViewBuildError),
}

fn summarize(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type TransferResult<T> = Result<T, TransferError>;
