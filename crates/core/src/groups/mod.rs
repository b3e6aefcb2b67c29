//! Groups: models and the dual-write repository facade.

mod groups_model;
mod groups_repository;

pub use groups_model::*;
pub use groups_repository::*;
