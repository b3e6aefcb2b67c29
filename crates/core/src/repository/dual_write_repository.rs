//! Local-first repository that mirrors every write to the remote service.
//!
//! Local writes are awaited; remote mirrors run in the background through the
//! runtime's per-entity queue and never fail the caller. Mirrors that cannot
//! reach the remote land in the outbox and are replayed by the next sync pass.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use log::{debug, warn};
use serde_json::Value;

use crate::entity::{field_value, Entity, EntityKind, SyncPredicate};
use crate::errors::{Error, RemoteError, RemoteErrorKind, RemoteResult, Result, ValidationError};
use crate::remote::RemoteService;
use crate::store::EntityStore;
use crate::sync::{
    MirrorOperation, MirrorTicket, OutboxStatus, RetryPolicy, SyncRetryClass, SyncRuntime,
};

/// Queue key serializing mirrors of one entity.
pub fn mirror_key(kind: EntityKind, id: &str) -> String {
    format!("{}:{}", kind, id)
}

/// Tally of one outbox replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxReplay {
    pub replayed: usize,
    /// Rejected permanently by the remote and discarded.
    pub dropped: usize,
    /// Still pending after another failed attempt.
    pub retrying: usize,
    pub dead: usize,
}

impl OutboxReplay {
    pub fn merge(self, other: Self) -> Self {
        Self {
            replayed: self.replayed + other.replayed,
            dropped: self.dropped + other.dropped,
            retrying: self.retrying + other.retrying,
            dead: self.dead + other.dead,
        }
    }
}

pub struct DualWriteRepository<E: Entity> {
    user_id: Arc<String>,
    store: Arc<dyn EntityStore<E>>,
    remote: Arc<dyn RemoteService<E>>,
    runtime: Arc<SyncRuntime>,
    is_syncable: SyncPredicate<E>,
    local_cache_enabled: bool,
}

impl<E: Entity> DualWriteRepository<E> {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn EntityStore<E>>,
        remote: Arc<dyn RemoteService<E>>,
        runtime: Arc<SyncRuntime>,
        is_syncable: SyncPredicate<E>,
        local_cache_enabled: bool,
    ) -> Self {
        Self {
            user_id: Arc::new(user_id.into()),
            store,
            remote,
            runtime,
            is_syncable,
            local_cache_enabled,
        }
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    pub fn store(&self) -> &Arc<dyn EntityStore<E>> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService<E>> {
        &self.remote
    }

    pub fn runtime(&self) -> &Arc<SyncRuntime> {
        &self.runtime
    }

    pub fn local_cache_enabled(&self) -> bool {
        self.local_cache_enabled
    }

    pub fn is_syncable(&self, entity: &E) -> bool {
        (self.is_syncable)(entity)
    }

    fn retry(&self) -> &RetryPolicy {
        self.runtime.retry()
    }

    // Reads. The local store is authoritative unless the cache is disabled.

    pub async fn find_all(&self) -> Result<Vec<E>> {
        if self.local_cache_enabled {
            return self.store.get_all().await;
        }
        let operation = format!("get_all {}", E::KIND.collection());
        Ok(self
            .retry()
            .execute(&operation, || self.remote.get_all(self.user_id()))
            .await?)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<E>> {
        if self.local_cache_enabled {
            return self.store.get_by_id(id).await;
        }
        let operation = format!("get_by_id {}", E::KIND);
        match self
            .retry()
            .execute(&operation, || self.remote.get_by_id(self.user_id(), id))
            .await
        {
            Ok(entity) => Ok(Some(entity)),
            Err(err) if err.kind == RemoteErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Like [`Self::find_by_id`] but a missing entity is an error.
    pub async fn require(&self, id: &str) -> Result<E> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(E::KIND, id))
    }

    pub async fn find_by_field(&self, field: &str, value: &Value) -> Result<Vec<E>> {
        if self.local_cache_enabled {
            return self.store.find_by_field(field, value).await;
        }
        let all = self.find_all().await?;
        Ok(all
            .into_iter()
            .filter(|entity| field_value(entity, field).as_ref() == Some(value))
            .collect())
    }

    /// Entities owned by `parent_id`. Empty for kinds without a parent.
    pub async fn find_by_parent(&self, parent_id: &str) -> Result<Vec<E>> {
        let Some(field) = E::PARENT_FIELD else {
            return Ok(Vec::new());
        };
        if self.local_cache_enabled {
            return self
                .store
                .find_by_field(field, &Value::String(parent_id.to_string()))
                .await;
        }
        let operation = format!("get_by_parent {}", E::KIND.collection());
        Ok(self
            .retry()
            .execute(&operation, || {
                self.remote.get_by_parent(self.user_id(), parent_id)
            })
            .await?)
    }

    // Writes. Callers hold the runtime write gate.

    /// Persist a new entity and mirror its creation.
    pub async fn insert(&self, entity: E) -> Result<E> {
        if !self.local_cache_enabled {
            self.ensure_remote_writable(&entity)?;
            let operation = format!("create {}", E::KIND);
            let created = self
                .retry()
                .execute(&operation, || {
                    self.remote
                        .create(self.user_id(), &entity, Some(entity.id()))
                })
                .await?;
            return Ok(created);
        }

        self.store.put(entity.clone()).await?;
        self.mirror(MirrorOperation::Create, &entity);
        Ok(entity)
    }

    /// Persist an already-merged entity and mirror the full record.
    pub async fn replace(&self, entity: E) -> Result<E> {
        if !self.local_cache_enabled {
            self.ensure_remote_writable(&entity)?;
            let changes = serde_json::to_value(&entity)?;
            let operation = format!("update {}", E::KIND);
            let updated = self
                .retry()
                .execute(&operation, || {
                    self.remote.update(self.user_id(), entity.id(), &changes)
                })
                .await?;
            return Ok(updated);
        }

        self.store.put(entity.clone()).await?;
        self.mirror(MirrorOperation::Update, &entity);
        Ok(entity)
    }

    /// Remove locally and mirror the delete. A remote miss counts as done.
    pub async fn remove(&self, entity: &E) -> Result<()> {
        if !self.local_cache_enabled {
            self.ensure_remote_writable(entity)?;
            let operation = format!("delete {}", E::KIND);
            return match self
                .retry()
                .execute(&operation, || self.remote.delete(self.user_id(), entity.id()))
                .await
            {
                Ok(()) => Ok(()),
                Err(err) if err.kind == RemoteErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }

        self.store.delete(entity.id()).await?;
        self.mirror(MirrorOperation::Delete, entity);
        Ok(())
    }

    /// Write locally derived fields. Neither stamps `updatedAt` nor mirrors;
    /// without a local cache only `changes` are sent to the remote.
    pub async fn write_derived(&self, entity: E, changes: Value) -> Result<E> {
        if !self.local_cache_enabled {
            let operation = format!("update {}", E::KIND);
            let updated = self
                .retry()
                .execute(&operation, || {
                    self.remote.update(self.user_id(), entity.id(), &changes)
                })
                .await?;
            return Ok(updated);
        }

        self.store.put(entity.clone()).await?;
        Ok(entity)
    }

    fn ensure_remote_writable(&self, entity: &E) -> Result<()> {
        if self.is_syncable(entity) {
            Ok(())
        } else {
            Err(ValidationError::LocalOnly(entity.id().to_string()).into())
        }
    }

    fn mirror_context(&self) -> MirrorContext<E> {
        MirrorContext {
            remote: Arc::clone(&self.remote),
            runtime: Arc::clone(&self.runtime),
            user_id: Arc::clone(&self.user_id),
        }
    }

    fn mirror(&self, op: MirrorOperation, entity: &E) {
        if !self.is_syncable(entity) {
            debug!(
                "[Mirror] Skipping {} of local-only {} {}",
                op,
                E::KIND,
                entity.id()
            );
            return;
        }
        let payload = match op {
            MirrorOperation::Delete => None,
            MirrorOperation::Create | MirrorOperation::Update => {
                match serde_json::to_value(entity) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(
                            "[Mirror] Could not encode {} {}: {}",
                            E::KIND,
                            entity.id(),
                            err
                        );
                        return;
                    }
                }
            }
        };

        let entity_id = entity.id().to_string();
        let parent = parent_key::<E>(payload.as_ref());
        let after = match op {
            MirrorOperation::Create => parent.as_ref().map(|(kind, id)| mirror_key(*kind, id)),
            MirrorOperation::Update | MirrorOperation::Delete => None,
        };
        let job = self
            .mirror_context()
            .mirror(entity_id.clone(), op, payload, parent);
        let _ = self.runtime.mirror_queue().submit_behind(
            mirror_key(E::KIND, &entity_id),
            after.as_deref(),
            job,
        );
    }

    /// Replay every pending outbox entry of this kind through the mirror
    /// queue and wait for the results.
    pub async fn replay_outbox(&self) -> OutboxReplay {
        let entries = self.runtime.outbox().pending(E::KIND);
        if entries.is_empty() {
            return OutboxReplay::default();
        }
        debug!(
            "[Outbox] Replaying {} pending {} mirror(s)",
            entries.len(),
            E::KIND
        );

        let tally = Arc::new(Mutex::new(OutboxReplay::default()));
        let tickets: Vec<MirrorTicket> = entries
            .into_iter()
            .map(|entry| {
                let job = self
                    .mirror_context()
                    .replay(entry.entity_id.clone(), Arc::clone(&tally));
                self.runtime
                    .mirror_queue()
                    .submit(mirror_key(E::KIND, &entry.entity_id), job)
            })
            .collect();
        join_all(tickets.into_iter().map(MirrorTicket::finished)).await;

        let replay = match tally.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        replay
    }
}

enum ReplayOutcome {
    Replayed,
    Dropped,
    Retrying,
    Dead,
}

/// Owned handles a background mirror job needs.
struct MirrorContext<E: Entity> {
    remote: Arc<dyn RemoteService<E>>,
    runtime: Arc<SyncRuntime>,
    user_id: Arc<String>,
}

impl<E: Entity> MirrorContext<E> {
    async fn mirror(
        self,
        entity_id: String,
        op: MirrorOperation,
        payload: Option<Value>,
        parent: Option<(EntityKind, String)>,
    ) {
        let outbox = self.runtime.outbox();
        if outbox.contains(E::KIND, &entity_id) {
            debug!(
                "[Mirror] {} {} {} queued behind a pending outbox entry",
                op,
                E::KIND,
                entity_id
            );
            outbox.record(E::KIND, &entity_id, op, payload, None);
            return;
        }
        if let Some((parent_kind, parent_id)) = parent
            .as_ref()
            .filter(|(kind, id)| outbox.contains(*kind, id))
        {
            debug!(
                "[Mirror] {} {} {} deferred until {} {} reaches the remote",
                op,
                E::KIND,
                entity_id,
                parent_kind,
                parent_id
            );
            outbox.record(E::KIND, &entity_id, op, payload, None);
            return;
        }

        let result = send_mirror(
            self.remote.as_ref(),
            self.runtime.retry(),
            self.user_id.as_str(),
            op,
            &entity_id,
            payload.as_ref(),
        )
        .await;

        let err = match result {
            Ok(()) => {
                outbox.remove(E::KIND, &entity_id);
                debug!("[Mirror] {} {} {} mirrored", op, E::KIND, entity_id);
                return;
            }
            Err(err) => err,
        };

        let class = err.failure_class();
        match err.retry_class() {
            SyncRetryClass::Permanent => {
                warn!(
                    "[Mirror] {} {} {} failed ({}): {}; not retried",
                    op,
                    E::KIND,
                    entity_id,
                    class,
                    err
                );
            }
            SyncRetryClass::ReauthRequired => {
                warn!(
                    "[Mirror] {} {} {} failed: re-authentication required ({}); kept for replay after sign-in",
                    op,
                    E::KIND,
                    entity_id,
                    err
                );
                outbox.record(E::KIND, &entity_id, op, payload, Some(err.to_string()));
            }
            SyncRetryClass::Retryable => {
                warn!(
                    "[Mirror] {} {} {} failed ({}): {}; kept for replay on next sync",
                    op,
                    E::KIND,
                    entity_id,
                    class,
                    err
                );
                outbox.record(E::KIND, &entity_id, op, payload, Some(err.to_string()));
            }
        }
    }

    async fn replay(self, entity_id: String, tally: Arc<Mutex<OutboxReplay>>) {
        let outbox = self.runtime.outbox();
        let Some(entry) = outbox
            .get(E::KIND, &entity_id)
            .filter(|entry| entry.status == OutboxStatus::Pending)
        else {
            return;
        };

        let waiting_on = parent_key::<E>(entry.payload.as_ref())
            .filter(|(kind, id)| outbox.contains(*kind, id));
        if let Some((parent_kind, parent_id)) = waiting_on {
            debug!(
                "[Outbox] {} {} {} still waits for {} {}",
                entry.op,
                E::KIND,
                entity_id,
                parent_kind,
                parent_id
            );
            add_to_tally(&tally, ReplayOutcome::Retrying);
            return;
        }

        let result = send_mirror(
            self.remote.as_ref(),
            self.runtime.retry(),
            self.user_id.as_str(),
            entry.op,
            &entity_id,
            entry.payload.as_ref(),
        )
        .await;

        let outcome = match result {
            Ok(()) => {
                outbox.remove(E::KIND, &entity_id);
                debug!("[Outbox] Replayed {} {} {}", entry.op, E::KIND, entity_id);
                ReplayOutcome::Replayed
            }
            Err(err) if err.retry_class() == SyncRetryClass::Permanent => {
                outbox.remove(E::KIND, &entity_id);
                warn!(
                    "[Outbox] Dropping {} {} {}: rejected ({}): {}",
                    entry.op,
                    E::KIND,
                    entity_id,
                    err.failure_class(),
                    err
                );
                ReplayOutcome::Dropped
            }
            Err(err) => {
                let max_attempts = self.runtime.outbox_max_attempts();
                match outbox.mark_failed(E::KIND, &entity_id, err.to_string(), max_attempts) {
                    Some(OutboxStatus::Dead) => ReplayOutcome::Dead,
                    _ => {
                        debug!(
                            "[Outbox] {} {} {} still failing ({}): {}",
                            entry.op,
                            E::KIND,
                            entity_id,
                            err.failure_class(),
                            err
                        );
                        ReplayOutcome::Retrying
                    }
                }
            }
        };

        add_to_tally(&tally, outcome);
    }
}

fn add_to_tally(tally: &Mutex<OutboxReplay>, outcome: ReplayOutcome) {
    let mut tally = match tally.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match outcome {
        ReplayOutcome::Replayed => tally.replayed += 1,
        ReplayOutcome::Dropped => tally.dropped += 1,
        ReplayOutcome::Retrying => tally.retrying += 1,
        ReplayOutcome::Dead => tally.dead += 1,
    }
}

/// Parent of the entity encoded in a mirror payload, for kinds that have one.
fn parent_key<E: Entity>(payload: Option<&Value>) -> Option<(EntityKind, String)> {
    let kind = E::PARENT_KIND?;
    let field = E::PARENT_FIELD?;
    let parent_id = payload?.get(field)?.as_str()?;
    Some((kind, parent_id.to_string()))
}

/// Send one mirror operation with retries.
///
/// A create that collides with an existing remote row falls back to an
/// update, an update of a missing row falls back to a create, and deleting a
/// missing row succeeds.
pub(crate) async fn send_mirror<E: Entity>(
    remote: &dyn RemoteService<E>,
    retry: &RetryPolicy,
    user_id: &str,
    op: MirrorOperation,
    entity_id: &str,
    payload: Option<&Value>,
) -> RemoteResult<()> {
    match (op, payload) {
        (MirrorOperation::Delete, _) => {
            let operation = format!("delete {}", E::KIND);
            match retry
                .execute(&operation, || remote.delete(user_id, entity_id))
                .await
            {
                Ok(()) => Ok(()),
                Err(err) if err.kind == RemoteErrorKind::NotFound => {
                    debug!("[Mirror] {} {} already gone remotely", E::KIND, entity_id);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        (MirrorOperation::Create, Some(payload)) => {
            match create_remote::<E>(remote, retry, user_id, entity_id, payload).await {
                Err(err) if err.kind == RemoteErrorKind::Conflict => {
                    debug!(
                        "[Mirror] {} {} already exists remotely; updating instead",
                        E::KIND,
                        entity_id
                    );
                    update_remote(remote, retry, user_id, entity_id, payload).await
                }
                other => other,
            }
        }
        (MirrorOperation::Update, Some(payload)) => {
            match update_remote(remote, retry, user_id, entity_id, payload).await {
                Err(err) if err.kind == RemoteErrorKind::NotFound => {
                    debug!(
                        "[Mirror] {} {} missing remotely; creating instead",
                        E::KIND,
                        entity_id
                    );
                    create_remote::<E>(remote, retry, user_id, entity_id, payload).await
                }
                other => other,
            }
        }
        (op, None) => Err(RemoteError::unknown(format!(
            "{} {} {} has no payload",
            op,
            E::KIND,
            entity_id
        ))),
    }
}

async fn create_remote<E: Entity>(
    remote: &dyn RemoteService<E>,
    retry: &RetryPolicy,
    user_id: &str,
    entity_id: &str,
    payload: &Value,
) -> RemoteResult<()> {
    let entity: E = serde_json::from_value(payload.clone())?;
    let operation = format!("create {}", E::KIND);
    retry
        .execute(&operation, || remote.create(user_id, &entity, Some(entity_id)))
        .await
        .map(|_| ())
}

async fn update_remote<E: Entity>(
    remote: &dyn RemoteService<E>,
    retry: &RetryPolicy,
    user_id: &str,
    entity_id: &str,
    payload: &Value,
) -> RemoteResult<()> {
    let operation = format!("update {}", E::KIND);
    retry
        .execute(&operation, || remote.update(user_id, entity_id, payload))
        .await
        .map(|_| ())
}
