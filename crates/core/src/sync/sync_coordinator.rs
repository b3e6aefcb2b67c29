//! Full synchronization passes between the local cache and the remote service.
//!
//! A pass first settles background mirrors (waits for in-flight ones and
//! replays the outbox), then pushes and/or pulls with last-writer-wins
//! reconciliation. Entities with a pending outbox entry are left out of both
//! directions until their mirror lands.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, MutexGuard};

use crate::cards::Card;
use crate::entity::Entity;
use crate::errors::{Error, RemoteError, Result};
use crate::groups::Group;
use crate::remote::RemoteService;
use crate::repository::{
    mirror_key, recompute_group_counts, send_mirror, DualWriteRepository, OutboxReplay,
};
use crate::store::EntityStore;

use super::outbox::MirrorOperation;
use super::reconciliation::{plan, SyncAction, SyncDirection};
use super::sync_runtime::SyncRuntime;

/// Step of a sync pass, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    SettleMirrors,
    PushGroups,
    PushCards,
    PullGroups,
    PullCards,
    Restore,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SettleMirrors => "settle mirrors",
            Self::PushGroups => "push groups",
            Self::PushCards => "push cards",
            Self::PullGroups => "pull groups",
            Self::PullCards => "pull cards",
            Self::Restore => "restore",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Result of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Groups written to either side.
    pub groups_synced: usize,
    /// Cards written to either side.
    pub cards_synced: usize,
    pub outbox_replayed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Failed mirrors waiting in the outbox.
    pub pending_mirrors: usize,
}

#[derive(Debug, Default)]
struct PullOutcome {
    applied: usize,
    affected_groups: HashSet<String>,
}

pub struct SyncCoordinator {
    user_id: String,
    groups: Arc<DualWriteRepository<Group>>,
    cards: Arc<DualWriteRepository<Card>>,
    runtime: Arc<SyncRuntime>,
    pull_cards_per_group: bool,
    cycle_mutex: Mutex<()>,
    cancel_requested: AtomicBool,
    status: RwLock<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        user_id: impl Into<String>,
        groups: Arc<DualWriteRepository<Group>>,
        cards: Arc<DualWriteRepository<Card>>,
        runtime: Arc<SyncRuntime>,
        pull_cards_per_group: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            groups,
            cards,
            runtime,
            pull_cards_per_group,
            cycle_mutex: Mutex::new(()),
            cancel_requested: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Push local changes, then pull remote ones.
    pub async fn perform_initial_sync(&self, user_id: &str) -> Result<SyncReport> {
        let _cycle = self.begin("Initial")?;
        let started = Instant::now();
        let result = if self.groups.local_cache_enabled() {
            self.run_initial(user_id).await
        } else {
            debug!("[Sync] Local cache disabled; nothing to reconcile");
            Ok(SyncReport::default())
        };
        self.finish("Initial", started, result)
    }

    /// Pull-only pass for the session user.
    pub async fn perform_background_sync(&self) -> Result<SyncReport> {
        let _cycle = self.begin("Background")?;
        let started = Instant::now();
        let result = if self.groups.local_cache_enabled() {
            self.run_background().await
        } else {
            Ok(SyncReport::default())
        };
        self.finish("Background", started, result)
    }

    /// User-requested "sync now": a full pass for the session user.
    pub async fn force_sync(&self) -> Result<SyncReport> {
        self.perform_initial_sync(&self.user_id).await
    }

    /// Replace the syncable part of the local cache with the remote copy.
    /// Local-only entities are kept; pending mirrors are discarded.
    pub async fn restore_from_remote(&self) -> Result<SyncReport> {
        let _cycle = self.begin("Restore")?;
        let started = Instant::now();
        let result = if self.groups.local_cache_enabled() {
            self.phase(SyncPhase::Restore, self.run_restore()).await
        } else {
            Ok(SyncReport::default())
        };
        self.finish("Restore", started, result)
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        status.pending_mirrors = self.runtime.outbox().pending_count();
        status
    }

    pub fn state(&self) -> SyncState {
        if self.status().is_syncing {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Ask the running pass to stop at the next phase or entity boundary.
    pub fn cancel(&self) {
        if self.status().is_syncing {
            info!("[Sync] Cancellation requested");
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
    }

    fn begin(&self, pass: &str) -> Result<MutexGuard<'_, ()>> {
        let guard = self.cycle_mutex.try_lock().map_err(|_| {
            debug!("[Sync] {} sync skipped: another pass is running", pass);
            Error::SyncInProgress
        })?;
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.update_status(|status| status.is_syncing = true);
        debug!("[Sync] {} sync started for user {}", pass, self.user_id);
        Ok(guard)
    }

    fn finish(&self, pass: &str, started: Instant, result: Result<SyncReport>) -> Result<SyncReport> {
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(mut report) => {
                report.duration_ms = duration_ms;
                self.update_status(|status| {
                    status.is_syncing = false;
                    status.last_sync_time = Some(Utc::now());
                    status.last_error = None;
                });
                info!(
                    "[Sync] {} sync complete groups={} cards={} replayed={} duration_ms={}",
                    pass,
                    report.groups_synced,
                    report.cards_synced,
                    report.outbox_replayed,
                    duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                self.update_status(|status| {
                    status.is_syncing = false;
                    status.last_error = Some(err.to_string());
                });
                match &err {
                    Error::SyncCancelled => info!("[Sync] {} sync cancelled", pass),
                    _ => warn!("[Sync] {} sync failed: {}", pass, err),
                }
                Err(err)
            }
        }
    }

    fn update_status(&self, apply: impl FnOnce(&mut SyncStatus)) {
        match self.status.write() {
            Ok(mut guard) => apply(&mut guard),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            Err(Error::SyncCancelled)
        } else {
            Ok(())
        }
    }

    async fn phase<T>(&self, phase: SyncPhase, work: impl Future<Output = Result<T>>) -> Result<T> {
        self.check_cancelled()?;
        debug!("[Sync] Phase '{}' started", phase);
        work.await.map_err(|err| match err {
            Error::SyncCancelled => Error::SyncCancelled,
            other => Error::SyncFailed {
                phase,
                source: Box::new(other),
            },
        })
    }

    async fn run_initial(&self, user_id: &str) -> Result<SyncReport> {
        let mut report = SyncReport {
            outbox_replayed: self.phase(SyncPhase::SettleMirrors, self.settle_mirrors()).await?,
            ..Default::default()
        };
        report.groups_synced += self.phase(SyncPhase::PushGroups, self.push(&*self.groups, user_id)).await?;
        report.cards_synced += self.phase(SyncPhase::PushCards, self.push(&*self.cards, user_id)).await?;
        self.run_pulls(user_id, &mut report).await?;
        Ok(report)
    }

    async fn run_background(&self) -> Result<SyncReport> {
        let mut report = SyncReport {
            outbox_replayed: self.phase(SyncPhase::SettleMirrors, self.settle_mirrors()).await?,
            ..Default::default()
        };
        self.run_pulls(&self.user_id, &mut report).await?;
        Ok(report)
    }

    async fn run_pulls(&self, user_id: &str, report: &mut SyncReport) -> Result<()> {
        report.groups_synced += self.phase(SyncPhase::PullGroups, self.pull_groups(user_id)).await?;
        report.cards_synced += self.phase(SyncPhase::PullCards, self.pull_cards(user_id)).await?;
        Ok(())
    }

    /// Wait for in-flight mirrors, then replay the outbox (groups before cards).
    async fn settle_mirrors(&self) -> Result<usize> {
        self.runtime.mirror_queue().wait_idle().await;
        let replay = self
            .groups
            .replay_outbox()
            .await
            .merge(self.cards.replay_outbox().await);
        if replay != OutboxReplay::default() {
            info!(
                "[Outbox] Replay finished replayed={} retrying={} dropped={} dead={}",
                replay.replayed, replay.retrying, replay.dropped, replay.dead
            );
        }
        Ok(replay.replayed)
    }

    async fn fetch_remote<E: Entity>(&self, repo: &DualWriteRepository<E>, user_id: &str) -> Result<Vec<E>> {
        let operation = format!("get_all {}", E::KIND.collection());
        Ok(self
            .runtime
            .retry()
            .execute(&operation, || repo.remote().get_all(user_id))
            .await?)
    }

    async fn push<E: Entity>(&self, repo: &DualWriteRepository<E>, user_id: &str) -> Result<usize> {
        let remote = self.fetch_remote(repo, user_id).await?;
        let local = repo.store().get_all().await?;
        let pending = self.runtime.outbox().pending_ids(E::KIND);
        let actions = plan(SyncDirection::Push, &local, &remote, |entity| {
            repo.is_syncable(entity) && !pending.contains(entity.id())
        });

        let mut pushed = 0;
        for action in actions {
            self.check_cancelled()?;
            let (op, entity) = match action {
                SyncAction::CreateRemote(entity) => (MirrorOperation::Create, entity),
                SyncAction::UpdateRemote(entity) => (MirrorOperation::Update, entity),
                SyncAction::CreateLocal(_) | SyncAction::UpdateLocal(_) => continue,
            };
            if self.push_one(repo, user_id, op, entity.id()).await? {
                pushed += 1;
            }
        }
        debug!("[Sync] Pushed {} {}", pushed, E::KIND.collection());
        Ok(pushed)
    }

    /// Push the current local copy of one entity through its mirror queue so
    /// it cannot overtake, or be overtaken by, a user mirror of the same id.
    async fn push_one<E: Entity>(
        &self,
        repo: &DualWriteRepository<E>,
        user_id: &str,
        op: MirrorOperation,
        entity_id: &str,
    ) -> Result<bool> {
        let (done_tx, done_rx) = oneshot::channel();
        let job = push_current(
            Arc::clone(repo.store()),
            Arc::clone(repo.remote()),
            Arc::clone(&self.runtime),
            user_id.to_string(),
            op,
            entity_id.to_string(),
        );
        let _ = self
            .runtime
            .mirror_queue()
            .submit(mirror_key(E::KIND, entity_id), async move {
                let _ = done_tx.send(job.await);
            });

        done_rx.await.map_err(|_| {
            Error::Remote(RemoteError::unknown(format!(
                "push of {} {} was interrupted",
                E::KIND,
                entity_id
            )))
        })?
    }

    async fn pull_groups(&self, user_id: &str) -> Result<usize> {
        let remote = self.fetch_remote(&*self.groups, user_id).await?;

        let _exclusive = self.runtime.write_gate().write().await;
        let outcome = self.apply_pull(&*self.groups, remote, None).await?;
        self.refresh_counts(&outcome.affected_groups).await?;
        Ok(outcome.applied)
    }

    async fn pull_cards(&self, user_id: &str) -> Result<usize> {
        let remote = if self.pull_cards_per_group {
            let local_groups = self.groups.store().get_all().await?;
            let mut cards = Vec::new();
            for group in local_groups.iter().filter(|g| self.groups.is_syncable(g)) {
                self.check_cancelled()?;
                let batch = self
                    .runtime
                    .retry()
                    .execute("get_by_parent cards", || {
                        self.cards.remote().get_by_parent(user_id, &group.id)
                    })
                    .await?;
                cards.extend(batch);
            }
            cards
        } else {
            self.fetch_remote(&*self.cards, user_id).await?
        };

        let _exclusive = self.runtime.write_gate().write().await;
        let known_groups: HashSet<String> = self
            .groups
            .store()
            .get_all()
            .await?
            .into_iter()
            .map(|group| group.id)
            .collect();
        let outcome = self.apply_pull(&*self.cards, remote, Some(&known_groups)).await?;
        self.refresh_counts(&outcome.affected_groups).await?;
        Ok(outcome.applied)
    }

    /// Write remote-newer entities into the local store. Caller holds the
    /// write gate exclusively.
    async fn apply_pull<E: Entity>(
        &self,
        repo: &DualWriteRepository<E>,
        remote: Vec<E>,
        known_parents: Option<&HashSet<String>>,
    ) -> Result<PullOutcome> {
        let local = repo.store().get_all().await?;
        let pending = self.runtime.outbox().pending_ids(E::KIND);
        let previous_parents: HashMap<String, String> = local
            .iter()
            .filter_map(|e| e.parent_id().map(|p| (e.id().to_string(), p.to_string())))
            .collect();
        let actions = plan(SyncDirection::Pull, &local, &remote, |entity| {
            repo.is_syncable(entity) && !pending.contains(entity.id())
        });

        let mut outcome = PullOutcome::default();
        for action in actions {
            let entity = match action {
                SyncAction::CreateLocal(entity) | SyncAction::UpdateLocal(entity) => entity,
                SyncAction::CreateRemote(_) | SyncAction::UpdateRemote(_) => continue,
            };
            match (entity.parent_id(), known_parents) {
                (Some(parent), Some(known)) if !known.contains(parent) => {
                    warn!(
                        "[Sync] Skipping remote {} {}: parent {} is not available locally",
                        E::KIND,
                        entity.id(),
                        parent
                    );
                    continue;
                }
                (Some(parent), _) => {
                    outcome.affected_groups.insert(parent.to_string());
                    if let Some(previous) = previous_parents.get(entity.id()) {
                        outcome.affected_groups.insert(previous.clone());
                    }
                }
                (None, _) => {
                    outcome.affected_groups.insert(entity.id().to_string());
                }
            }
            repo.store().put(entity).await?;
            outcome.applied += 1;
        }
        debug!(
            "[Sync] Pulled {} {} (skipped {} with pending mirrors)",
            outcome.applied,
            E::KIND.collection(),
            pending.len()
        );
        Ok(outcome)
    }

    async fn refresh_counts(&self, group_ids: &HashSet<String>) -> Result<()> {
        for group_id in group_ids {
            recompute_group_counts(&self.groups, &self.cards, group_id).await?;
        }
        Ok(())
    }

    async fn run_restore(&self) -> Result<SyncReport> {
        self.runtime.mirror_queue().wait_idle().await;
        let remote_groups = self.fetch_remote(&*self.groups, &self.user_id).await?;
        let remote_cards = self.fetch_remote(&*self.cards, &self.user_id).await?;

        let _exclusive = self.runtime.write_gate().write().await;
        let mut groups: Vec<Group> = self
            .groups
            .store()
            .get_all()
            .await?
            .into_iter()
            .filter(|group| !self.groups.is_syncable(group))
            .collect();
        let restored_groups = remote_groups
            .into_iter()
            .filter(|group| self.groups.is_syncable(group))
            .collect::<Vec<_>>();
        let groups_synced = restored_groups.len();
        groups.extend(restored_groups);

        let group_ids: HashSet<String> = groups.iter().map(|group| group.id.clone()).collect();
        let mut cards: Vec<Card> = self
            .cards
            .store()
            .get_all()
            .await?
            .into_iter()
            .filter(|card| !self.cards.is_syncable(card))
            .collect();
        let restored_cards = remote_cards
            .into_iter()
            .filter(|card| self.cards.is_syncable(card) && group_ids.contains(&card.group_id))
            .collect::<Vec<_>>();
        let cards_synced = restored_cards.len();
        cards.extend(restored_cards);

        let mut totals: HashMap<&str, (u32, u32)> = HashMap::new();
        for card in &cards {
            let entry = totals.entry(card.group_id.as_str()).or_default();
            entry.0 += 1;
            if card.is_active {
                entry.1 += 1;
            }
        }
        for group in &mut groups {
            let (card_count, study_card_count) =
                totals.get(group.id.as_str()).copied().unwrap_or_default();
            group.card_count = card_count;
            group.study_card_count = study_card_count;
        }

        let discarded = self.runtime.outbox().discard_pending(Group::KIND)
            + self.runtime.outbox().discard_pending(Card::KIND);
        if discarded > 0 {
            warn!("[Outbox] Discarded {} pending mirror(s) replaced by restore", discarded);
        }

        self.groups.store().bulk_replace(groups).await?;
        self.cards.store().bulk_replace(cards).await?;
        Ok(SyncReport {
            groups_synced,
            cards_synced,
            ..Default::default()
        })
    }
}

async fn push_current<E: Entity>(
    store: Arc<dyn EntityStore<E>>,
    remote: Arc<dyn RemoteService<E>>,
    runtime: Arc<SyncRuntime>,
    user_id: String,
    op: MirrorOperation,
    entity_id: String,
) -> Result<bool> {
    let Some(entity) = store.get_by_id(&entity_id).await? else {
        return Ok(false);
    };
    let payload = serde_json::to_value(&entity)?;
    send_mirror(
        remote.as_ref(),
        runtime.retry(),
        &user_id,
        op,
        &entity_id,
        Some(&payload),
    )
    .await?;
    Ok(true)
}
