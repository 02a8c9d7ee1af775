//! Core types for import and export

mod entity;
mod import_view;
mod plan;
mod value;

pub use entity::*;
pub use import_view::*;
pub use plan::*;
pub use value::*;
