//! SQLite-backed local cache for the studydeck sync engine.

pub mod db;
pub mod entities;
pub mod errors;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use studydeck_core::cards::Card;
use studydeck_core::groups::Group;
use studydeck_core::session::SessionStores;

pub use db::{DbPool, WriteHandle};
pub use entities::SqliteEntityStore;
pub use errors::StorageError;

/// Open the database at `db_path` and build the stores a session needs.
pub fn open_session_stores(db_path: &Path) -> studydeck_core::Result<SessionStores> {
    let pool = db::init(db_path)?;
    let writer = WriteHandle::new(Arc::clone(&pool));
    Ok(SessionStores {
        groups: Arc::new(SqliteEntityStore::<Group>::new(Arc::clone(&pool), writer.clone())),
        cards: Arc::new(SqliteEntityStore::<Card>::new(pool, writer)),
    })
}
