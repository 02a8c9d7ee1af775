//! Command handlers

pub mod entities;
pub mod export;
pub mod import;
pub mod view;
