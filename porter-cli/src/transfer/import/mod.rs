//! Graph-aware import of detached entities

pub mod context;
pub mod engine;
pub mod hooks;
pub mod view_builder;

pub use context::{LoadedEntities, Owner, ReferenceInfo};
pub use engine::{ImportOptions, ImportSession};
pub use hooks::{ImportPermission, NoRowLevelFilter, PermitAll, RowLevelFilter};
pub use view_builder::{merge_views, ImportViewJsonBuilder, ViewBuildError, ViewBuildResult};
