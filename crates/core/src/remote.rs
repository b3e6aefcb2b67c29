//! Remote service contract consumed by repositories and the sync coordinator.

use async_trait::async_trait;

use crate::entity::Entity;
use crate::errors::RemoteResult;

/// Per-kind CRUD and query API of the authoritative remote store.
///
/// Every call is scoped by an opaque user id. Failures carry a
/// [`crate::errors::RemoteErrorKind`] so callers can tell network, auth and
/// validation problems apart.
#[async_trait]
pub trait RemoteService<E: Entity>: Send + Sync {
    /// Create `entity` remotely. When `fixed_id` is set the remote must use it
    /// as the primary key.
    async fn create(&self, user_id: &str, entity: &E, fixed_id: Option<&str>) -> RemoteResult<E>;

    /// Apply a partial update. `changes` is a camelCase JSON object.
    async fn update(&self, user_id: &str, id: &str, changes: &serde_json::Value)
        -> RemoteResult<E>;

    async fn delete(&self, user_id: &str, id: &str) -> RemoteResult<()>;

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<E>>;

    /// Entities owned by `parent_id` (cards of a group).
    async fn get_by_parent(&self, user_id: &str, parent_id: &str) -> RemoteResult<Vec<E>>;

    async fn get_by_id(&self, user_id: &str, id: &str) -> RemoteResult<E>;
}
