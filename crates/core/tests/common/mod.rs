#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use studydeck_core::cards::{Card, CardRepository};
use studydeck_core::config::{RetryConfig, SyncConfig};
use studydeck_core::entity::{field_value, Entity, EntitySource};
use studydeck_core::errors::{RemoteError, RemoteResult};
use studydeck_core::groups::{Group, GroupRepository};
use studydeck_core::remote::RemoteService;
use studydeck_core::session::{SessionContext, SessionRemotes, SessionStores};
use studydeck_core::store::{EntityStore, InMemoryEntityStore};
use studydeck_core::sync::SyncCoordinator;
use studydeck_core::Result;

pub const USER: &str = "user-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub id: Option<String>,
}

type CreateCheck<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Scriptable in-memory stand-in for the remote service.
pub struct FakeRemote<E: Entity> {
    rows: Mutex<Vec<E>>,
    calls: Mutex<Vec<RemoteCall>>,
    failure: Mutex<Option<(Option<&'static str>, RemoteError)>>,
    scripted: Mutex<VecDeque<RemoteError>>,
    hold_reads: AtomicBool,
    release: Notify,
    create_delay: Mutex<Option<Duration>>,
    create_check: Mutex<Option<CreateCheck<E>>>,
}

impl<E: Entity> FakeRemote<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            scripted: Mutex::new(VecDeque::new()),
            hold_reads: AtomicBool::new(false),
            release: Notify::new(),
            create_delay: Mutex::new(None),
            create_check: Mutex::new(None),
        })
    }

    /// Write a row as another device would, without recording a call.
    pub fn seed(&self, entity: E) {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.id() == entity.id()) {
            Some(existing) => *existing = entity,
            None => rows.push(entity),
        }
    }

    pub fn rows(&self) -> Vec<E> {
        self.rows.lock().unwrap().clone()
    }

    pub fn row(&self, id: &str) -> Option<E> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id() == id)
            .cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, op: &str) -> usize {
        self.calls().iter().filter(|call| call.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Fail every call until [`Self::recover`].
    pub fn fail_always(&self, err: RemoteError) {
        *self.failure.lock().unwrap() = Some((None, err));
    }

    /// Fail every call of one operation until [`Self::recover`].
    pub fn fail_op(&self, op: &'static str, err: RemoteError) {
        *self.failure.lock().unwrap() = Some((Some(op), err));
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Fail the next calls (any operation) with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.scripted.lock().unwrap().extend(errors);
    }

    /// Park `get_all` calls until [`Self::release_reads`].
    pub fn hold_reads(&self) {
        self.hold_reads.store(true, Ordering::SeqCst);
    }

    pub fn release_reads(&self) {
        self.hold_reads.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
        self.release.notify_one();
    }

    /// Delay every `create` before it is recorded.
    pub fn slow_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    /// Reject creates failing `check` with a 422, like a foreign key constraint.
    pub fn require_on_create(&self, check: impl Fn(&E) -> bool + Send + Sync + 'static) {
        *self.create_check.lock().unwrap() = Some(Arc::new(check));
    }

    fn begin(&self, op: &'static str, id: Option<&str>) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(RemoteCall {
            op,
            id: id.map(str::to_string),
        });
        if let Some(err) = self.scripted.lock().unwrap().pop_front() {
            return Err(err);
        }
        match &*self.failure.lock().unwrap() {
            Some((None, err)) => Err(err.clone()),
            Some((Some(failing), err)) if *failing == op => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<E: Entity> RemoteService<E> for FakeRemote<E> {
    async fn create(&self, _user_id: &str, entity: &E, fixed_id: Option<&str>) -> RemoteResult<E> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.begin("create", Some(entity.id()))?;
        let check = self.create_check.lock().unwrap().clone();
        if let Some(check) = check {
            if !check(entity) {
                return Err(RemoteError::from_status(422, "missing parent row"));
            }
        }
        let id = fixed_id.unwrap_or(entity.id());
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|row| row.id() == id) {
            return Err(RemoteError::from_status(409, "duplicate key"));
        }
        rows.push(entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, _user_id: &str, id: &str, changes: &Value) -> RemoteResult<E> {
        self.begin("update", Some(id))?;
        let mut rows = self.rows.lock().unwrap();
        let Some(existing) = rows.iter_mut().find(|row| row.id() == id) else {
            return Err(RemoteError::from_status(404, "no such row"));
        };
        let mut merged = serde_json::to_value(&*existing)?;
        if let (Value::Object(target), Value::Object(patch)) = (&mut merged, changes) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        *existing = serde_json::from_value(merged)?;
        Ok(existing.clone())
    }

    async fn delete(&self, _user_id: &str, id: &str) -> RemoteResult<()> {
        self.begin("delete", Some(id))?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| row.id() != id);
        if rows.len() == before {
            return Err(RemoteError::from_status(404, "no such row"));
        }
        Ok(())
    }

    async fn get_all(&self, _user_id: &str) -> RemoteResult<Vec<E>> {
        self.begin("get_all", None)?;
        if self.hold_reads.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(self.rows())
    }

    async fn get_by_parent(&self, _user_id: &str, parent_id: &str) -> RemoteResult<Vec<E>> {
        self.begin("get_by_parent", Some(parent_id))?;
        let Some(field) = E::PARENT_FIELD else {
            return Ok(Vec::new());
        };
        let parent = Value::String(parent_id.to_string());
        Ok(self
            .rows()
            .into_iter()
            .filter(|row| field_value(row, field).as_ref() == Some(&parent))
            .collect())
    }

    async fn get_by_id(&self, _user_id: &str, id: &str) -> RemoteResult<E> {
        self.begin("get_by_id", Some(id))?;
        self.row(id)
            .ok_or_else(|| RemoteError::from_status(404, "no such row"))
    }
}

/// In-memory store that counts writes.
pub struct CountingStore<E: Entity> {
    inner: InMemoryEntityStore<E>,
    writes: AtomicUsize,
}

impl<E: Entity> CountingStore<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryEntityStore::new(),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_writes(&self) {
        self.writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for CountingStore<E> {
    async fn get_all(&self) -> Result<Vec<E>> {
        self.inner.get_all().await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<E>> {
        self.inner.get_by_id(id).await
    }

    async fn find_by_field(&self, field: &str, value: &Value) -> Result<Vec<E>> {
        self.inner.find_by_field(field, value).await
    }

    async fn put(&self, entity: E) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(entity).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn bulk_replace(&self, entities: Vec<E>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_replace(entities).await
    }
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Some(Duration::from_secs(5)),
        },
        ..SyncConfig::default()
    }
}

/// A signed-in session over in-memory stores and fake remotes.
pub struct Harness {
    pub session: SessionContext,
    pub group_store: Arc<CountingStore<Group>>,
    pub card_store: Arc<CountingStore<Card>>,
    pub remote_groups: Arc<FakeRemote<Group>>,
    pub remote_cards: Arc<FakeRemote<Card>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let group_store = CountingStore::<Group>::new();
        let card_store = CountingStore::<Card>::new();
        let remote_groups = FakeRemote::<Group>::new();
        let remote_cards = FakeRemote::<Card>::new();

        let session = SessionContext::new(
            USER,
            config,
            SessionStores {
                groups: group_store.clone(),
                cards: card_store.clone(),
            },
            SessionRemotes {
                groups: remote_groups.clone(),
                cards: remote_cards.clone(),
            },
        );

        Self {
            session,
            group_store,
            card_store,
            remote_groups,
            remote_cards,
        }
    }

    pub fn groups(&self) -> Arc<GroupRepository> {
        self.session.group_repository()
    }

    pub fn cards(&self) -> Arc<CardRepository> {
        self.session.card_repository()
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        self.session.sync_coordinator()
    }

    /// Wait for every background mirror submitted so far.
    pub async fn settle(&self) {
        self.session.runtime().mirror_queue().wait_idle().await;
    }

    pub async fn local_group(&self, id: &str) -> Option<Group> {
        self.group_store.get_by_id(id).await.unwrap()
    }

    pub async fn local_card(&self, id: &str) -> Option<Card> {
        self.card_store.get_by_id(id).await.unwrap()
    }

    pub fn remote_calls_mentioning(&self, id: &str) -> usize {
        let mentions = |calls: Vec<RemoteCall>| {
            calls
                .iter()
                .filter(|call| call.id.as_deref() == Some(id))
                .count()
        };
        mentions(self.remote_groups.calls()) + mentions(self.remote_cards.calls())
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
}

/// A group as it would exist on the remote after another device wrote it.
pub fn remote_group(id: &str, name: &str, updated_at: DateTime<Utc>) -> Group {
    Group {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        card_count: 0,
        study_card_count: 0,
        tags: Vec::new(),
        is_active: true,
        source: EntitySource::UserCreated,
        created_at: at(0).min(updated_at),
        updated_at,
    }
}

pub fn remote_card(id: &str, group_id: &str, front: &str, updated_at: DateTime<Utc>) -> Card {
    Card {
        id: id.to_string(),
        group_id: group_id.to_string(),
        front: front.to_string(),
        back: "back".to_string(),
        hint: None,
        ease_factor: 2.5,
        interval: 0,
        repetitions: 0,
        next_review_date: None,
        last_studied_at: None,
        tags: Vec::new(),
        is_active: true,
        source: EntitySource::UserCreated,
        created_at: at(0).min(updated_at),
        updated_at,
    }
}
