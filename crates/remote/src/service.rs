//! [`RemoteService`] implementation over the REST API.
//!
//! Collections live under `/api/v1/users/{userId}/{groups|cards}` and entity
//! bodies are the camelCase JSON of the core models.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use studydeck_core::cards::Card;
use studydeck_core::entity::Entity;
use studydeck_core::errors::{RemoteError, RemoteResult};
use studydeck_core::groups::Group;
use studydeck_core::remote::RemoteService;
use studydeck_core::session::SessionRemotes;

use crate::client::RemoteApiClient;
use crate::error::RemoteClientError;

pub struct HttpRemoteService<E: Entity> {
    client: RemoteApiClient,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Entity> HttpRemoteService<E> {
    pub fn new(client: RemoteApiClient) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn collection_path(user_id: &str) -> Result<String, RemoteClientError> {
        if user_id.trim().is_empty() {
            return Err(RemoteClientError::invalid_request("user id is required"));
        }
        Ok(format!(
            "/api/v1/users/{}/{}",
            urlencoding::encode(user_id),
            E::KIND.collection()
        ))
    }

    fn entity_path(user_id: &str, id: &str) -> Result<String, RemoteClientError> {
        if id.trim().is_empty() {
            return Err(RemoteClientError::invalid_request(format!("{} id is required", E::KIND)));
        }
        Ok(format!("{}/{}", Self::collection_path(user_id)?, urlencoding::encode(id)))
    }
}

/// Remote services for a session, sharing one client.
pub fn session_remotes(client: &RemoteApiClient) -> SessionRemotes {
    SessionRemotes {
        groups: std::sync::Arc::new(HttpRemoteService::<Group>::new(client.clone())),
        cards: std::sync::Arc::new(HttpRemoteService::<Card>::new(client.clone())),
    }
}

#[async_trait]
impl<E: Entity> RemoteService<E> for HttpRemoteService<E> {
    async fn create(&self, user_id: &str, entity: &E, fixed_id: Option<&str>) -> RemoteResult<E> {
        let path = Self::collection_path(user_id)?;
        let mut body = serde_json::to_value(entity)?;
        if let (Some(id), Value::Object(fields)) = (fixed_id, &mut body) {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
        Ok(self.client.post(&path, &body).await?)
    }

    async fn update(&self, user_id: &str, id: &str, changes: &Value) -> RemoteResult<E> {
        if !changes.is_object() {
            return Err(RemoteError::from(RemoteClientError::invalid_request(
                "update body must be a JSON object",
            )));
        }
        let path = Self::entity_path(user_id, id)?;
        Ok(self.client.patch(&path, changes).await?)
    }

    async fn delete(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let path = Self::entity_path(user_id, id)?;
        Ok(self.client.delete(&path).await?)
    }

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<E>> {
        let path = Self::collection_path(user_id)?;
        Ok(self.client.get(&path).await?)
    }

    async fn get_by_parent(&self, user_id: &str, parent_id: &str) -> RemoteResult<Vec<E>> {
        let Some(field) = E::PARENT_FIELD else {
            return Ok(Vec::new());
        };
        let path = Self::collection_path(user_id)?;
        Ok(self.client.get_with_query(&path, &[(field, parent_id)]).await?)
    }

    async fn get_by_id(&self, user_id: &str, id: &str) -> RemoteResult<E> {
        let path = Self::entity_path(user_id, id)?;
        Ok(self.client.get(&path).await?)
    }
}
