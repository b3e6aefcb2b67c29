//! Per-user session wiring: repositories, coordinator and background sync.
//!
//! Built on sign-in and torn down by [`SessionContext::sign_out`]. Nothing in
//! the engine is a process-wide singleton.

use std::sync::Arc;

use log::{info, warn};

use crate::cards::{Card, CardRepository};
use crate::config::SyncConfig;
use crate::entity::{default_sync_predicate, SyncPredicate};
use crate::errors::Result;
use crate::groups::{Group, GroupRepository};
use crate::remote::RemoteService;
use crate::repository::DualWriteRepository;
use crate::store::EntityStore;
use crate::sync::{BackgroundSync, SyncCoordinator, SyncReport, SyncRuntime};

/// Local stores for each entity kind.
pub struct SessionStores {
    pub groups: Arc<dyn EntityStore<Group>>,
    pub cards: Arc<dyn EntityStore<Card>>,
}

/// Remote services for each entity kind.
pub struct SessionRemotes {
    pub groups: Arc<dyn RemoteService<Group>>,
    pub cards: Arc<dyn RemoteService<Card>>,
}

/// Which entities take part in mirroring and sync.
pub struct SyncPredicates {
    pub groups: SyncPredicate<Group>,
    pub cards: SyncPredicate<Card>,
}

impl Default for SyncPredicates {
    fn default() -> Self {
        Self {
            groups: default_sync_predicate(),
            cards: default_sync_predicate(),
        }
    }
}

pub struct SessionContext {
    user_id: Arc<String>,
    config: SyncConfig,
    runtime: Arc<SyncRuntime>,
    group_repository: Arc<GroupRepository>,
    card_repository: Arc<CardRepository>,
    sync_coordinator: Arc<SyncCoordinator>,
    background_sync: BackgroundSync,
}

impl SessionContext {
    pub fn new(
        user_id: impl Into<String>,
        config: SyncConfig,
        stores: SessionStores,
        remotes: SessionRemotes,
    ) -> Self {
        Self::with_predicates(user_id, config, stores, remotes, SyncPredicates::default())
    }

    pub fn with_predicates(
        user_id: impl Into<String>,
        config: SyncConfig,
        stores: SessionStores,
        remotes: SessionRemotes,
        predicates: SyncPredicates,
    ) -> Self {
        let user_id = Arc::new(user_id.into());
        let runtime = Arc::new(SyncRuntime::from_config(&config));

        let groups = Arc::new(DualWriteRepository::new(
            user_id.as_str(),
            stores.groups,
            remotes.groups,
            Arc::clone(&runtime),
            predicates.groups,
            config.local_cache_enabled,
        ));
        let cards = Arc::new(DualWriteRepository::new(
            user_id.as_str(),
            stores.cards,
            remotes.cards,
            Arc::clone(&runtime),
            predicates.cards,
            config.local_cache_enabled,
        ));

        let group_repository = Arc::new(GroupRepository::new(Arc::clone(&groups), Arc::clone(&cards)));
        let card_repository = Arc::new(CardRepository::new(Arc::clone(&cards), Arc::clone(&groups)));
        let sync_coordinator = Arc::new(SyncCoordinator::new(
            user_id.as_str(),
            groups,
            cards,
            Arc::clone(&runtime),
            config.pull_cards_per_group,
        ));

        info!(
            "[Session] Opened session for user {} (local cache {})",
            user_id,
            if config.local_cache_enabled { "on" } else { "off" }
        );

        Self {
            user_id,
            config,
            runtime,
            group_repository,
            card_repository,
            sync_coordinator,
            background_sync: BackgroundSync::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn runtime(&self) -> Arc<SyncRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn group_repository(&self) -> Arc<GroupRepository> {
        Arc::clone(&self.group_repository)
    }

    pub fn card_repository(&self) -> Arc<CardRepository> {
        Arc::clone(&self.card_repository)
    }

    pub fn sync_coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.sync_coordinator)
    }

    /// Run the initial sync, then keep syncing in the background. The loop
    /// starts even when the initial pass fails.
    pub async fn start_sync(&self) -> Result<SyncReport> {
        let initial = self.sync_coordinator.perform_initial_sync(self.user_id()).await;
        self.background_sync
            .start(self.sync_coordinator(), self.config.background_interval)
            .await;
        initial
    }

    pub fn notify_network_restored(&self) {
        self.background_sync.notify_network_restored();
    }

    pub async fn is_background_sync_running(&self) -> bool {
        self.background_sync.is_running().await
    }

    /// Stop background work and let in-flight mirrors finish.
    pub async fn sign_out(self) {
        self.background_sync.stop().await;
        self.sync_coordinator.cancel();
        self.runtime.mirror_queue().wait_idle().await;

        let pending = self.runtime.outbox().pending_count();
        if pending > 0 {
            warn!(
                "[Session] Signing out user {} with {} unsynced change(s) kept locally",
                self.user_id, pending
            );
        }
        info!("[Session] Signed out user {}", self.user_id);
    }
}
