//! Local entity store contract and an in-memory implementation.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::entity::{field_value, Entity};
use crate::errors::{Error, Result};

/// Local keyed store for one entity kind.
///
/// Stores must serialize conflicting writes to the same key. Every call is a
/// potential suspension point even when the backing engine is fast.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    async fn get_all(&self) -> Result<Vec<E>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<E>>;

    /// Entities whose serialized top-level `field` equals `value`.
    async fn find_by_field(&self, field: &str, value: &serde_json::Value) -> Result<Vec<E>>;

    /// Insert or overwrite by id.
    async fn put(&self, entity: E) -> Result<()>;

    /// Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Replace the whole collection, keeping the given order.
    async fn bulk_replace(&self, entities: Vec<E>) -> Result<()>;
}

/// Vec-backed store that keeps insertion order. Suited to tests and small
/// embedded collections.
pub struct InMemoryEntityStore<E: Entity> {
    rows: RwLock<Vec<E>>,
}

impl<E: Entity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn with_entities(entities: Vec<E>) -> Self {
        Self {
            rows: RwLock::new(entities),
        }
    }

    fn poisoned() -> Error {
        Error::storage(format!("{} store lock is poisoned", E::KIND))
    }
}

impl<E: Entity> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for InMemoryEntityStore<E> {
    async fn get_all(&self) -> Result<Vec<E>> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<E>> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.iter().find(|row| row.id() == id).cloned())
    }

    async fn find_by_field(&self, field: &str, value: &serde_json::Value) -> Result<Vec<E>> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|row| field_value(*row, field).as_ref() == Some(value))
            .cloned()
            .collect())
    }

    async fn put(&self, entity: E) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        match rows.iter_mut().find(|row| row.id() == entity.id()) {
            Some(existing) => *existing = entity,
            None => rows.push(entity),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.retain(|row| row.id() != id);
        Ok(())
    }

    async fn bulk_replace(&self, entities: Vec<E>) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        *rows = entities;
        Ok(())
    }
}
