//! Database row for a stored entity.

use diesel::prelude::*;

use studydeck_core::entity::Entity;

use crate::errors::StorageError;

/// One entity serialized as JSON, keyed by kind and id. `position` keeps
/// insertion order within a kind.
#[derive(Queryable, QueryableByName, Insertable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityRowDB {
    pub kind: String,
    pub id: String,
    pub position: i64,
    pub payload: String,
    pub updated_at: String,
}

impl EntityRowDB {
    pub fn from_entity<E: Entity>(entity: &E, position: i64) -> Result<Self, StorageError> {
        Ok(Self {
            kind: E::KIND.as_str().to_string(),
            id: entity.id().to_string(),
            position,
            payload: serde_json::to_string(entity)?,
            updated_at: entity.updated_at().to_rfc3339(),
        })
    }

    pub fn into_entity<E: Entity>(self) -> Result<E, StorageError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
