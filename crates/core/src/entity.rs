//! Shared entity contract for everything that takes part in dual-write sync.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Entity kinds managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Card,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Card => "card",
        }
    }

    /// Collection name used by stores and the remote API.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Group => "groups",
            Self::Card => "cards",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entity came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    #[default]
    UserCreated,
    /// Seeded fixtures that stay on this device.
    StarterPack,
}

/// A record stored both locally and remotely under the same id.
///
/// The local id is reused as the remote primary key, so no id translation
/// happens anywhere in the engine.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Serialized name of the field holding [`Entity::parent_id`].
    const PARENT_FIELD: Option<&'static str> = None;

    /// Kind of the entity named by [`Entity::parent_id`].
    const PARENT_KIND: Option<EntityKind> = None;

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn source(&self) -> EntitySource;

    /// Stamp `updatedAt` with the mutation time. Never moves it before `createdAt`.
    fn touch(&mut self, now: DateTime<Utc>);

    /// Id of the owning entity for kinds with a dependent count.
    fn parent_id(&self) -> Option<&str> {
        None
    }
}

/// Decides whether an entity participates in remote mirroring and sync.
pub type SyncPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Only user-created entities are synced; starter pack data stays local.
pub fn is_user_created<E: Entity>(entity: &E) -> bool {
    entity.source() == EntitySource::UserCreated
}

pub fn default_sync_predicate<E: Entity>() -> SyncPredicate<E> {
    Arc::new(is_user_created::<E>)
}

/// Read a top-level field of the entity's serialized (camelCase) form.
pub fn field_value<E: Entity>(entity: &E, field: &str) -> Option<serde_json::Value> {
    match serde_json::to_value(entity) {
        Ok(serde_json::Value::Object(mut map)) => map.remove(field),
        _ => None,
    }
}
