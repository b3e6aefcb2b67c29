//! SQLite persistence for synced entities.

mod model;
mod repository;

pub use model::EntityRowDB;
pub use repository::SqliteEntityStore;
