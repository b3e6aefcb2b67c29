//! Cards: models, SM-2 review scheduling and the dual-write repository facade.

mod cards_model;
mod cards_repository;
mod review;

pub use cards_model::*;
pub use cards_repository::*;
pub use review::*;
