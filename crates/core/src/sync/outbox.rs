//! In-memory outbox of mirror operations that could not reach the remote.
//!
//! Entries are keyed by (kind, entity id) and coalesced so only the latest
//! intent per entity is kept. The coordinator drains the outbox at the start
//! of every sync pass.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Remote mirror operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorOperation {
    Create,
    Update,
    Delete,
}

impl MirrorOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Combine a pending operation with a newer one for the same entity.
    fn coalesce(self, newer: Self) -> Self {
        match (self, newer) {
            // Remote never saw the create; the update payload becomes the create body.
            (Self::Create, Self::Update) => Self::Create,
            (_, newer) => newer,
        }
    }
}

impl std::fmt::Display for MirrorOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbox lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Dead,
}

/// A mirror operation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub kind: EntityKind,
    pub entity_id: String,
    pub op: MirrorOperation,
    /// Full camelCase entity for create/update; `None` for delete.
    pub payload: Option<serde_json::Value>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MirrorOutbox {
    entries: Mutex<Vec<OutboxEntry>>,
}

impl MirrorOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Vec<OutboxEntry>) -> T) -> T {
        match self.entries.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record a failed (or deferred) mirror, coalescing with any pending entry.
    pub fn record(
        &self,
        kind: EntityKind,
        entity_id: &str,
        op: MirrorOperation,
        payload: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let now = Utc::now();
        self.with_entries(|entries| {
            if let Some(existing) = entries
                .iter_mut()
                .find(|e| e.kind == kind && e.entity_id == entity_id)
            {
                existing.op = existing.op.coalesce(op);
                existing.payload = payload;
                if existing.status == OutboxStatus::Dead {
                    existing.attempts = 0;
                }
                existing.status = OutboxStatus::Pending;
                if error.is_some() {
                    existing.last_error = error;
                }
                existing.updated_at = now;
                debug!(
                    "[Outbox] Coalesced {} {} into pending {}",
                    kind, entity_id, existing.op
                );
                return;
            }
            entries.push(OutboxEntry {
                kind,
                entity_id: entity_id.to_string(),
                op,
                payload,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: error,
                created_at: now,
                updated_at: now,
            });
        });
    }

    pub fn contains(&self, kind: EntityKind, entity_id: &str) -> bool {
        self.with_entries(|entries| {
            entries
                .iter()
                .any(|e| e.kind == kind && e.entity_id == entity_id && e.status == OutboxStatus::Pending)
        })
    }

    pub fn get(&self, kind: EntityKind, entity_id: &str) -> Option<OutboxEntry> {
        self.with_entries(|entries| {
            entries
                .iter()
                .find(|e| e.kind == kind && e.entity_id == entity_id)
                .cloned()
        })
    }

    /// Pending entries of `kind` in the order they were first recorded.
    pub fn pending(&self, kind: EntityKind) -> Vec<OutboxEntry> {
        self.with_entries(|entries| {
            entries
                .iter()
                .filter(|e| e.kind == kind && e.status == OutboxStatus::Pending)
                .cloned()
                .collect()
        })
    }

    pub fn pending_ids(&self, kind: EntityKind) -> HashSet<String> {
        self.pending(kind).into_iter().map(|e| e.entity_id).collect()
    }

    pub fn remove(&self, kind: EntityKind, entity_id: &str) {
        self.with_entries(|entries| entries.retain(|e| !(e.kind == kind && e.entity_id == entity_id)));
    }

    /// Count a failed replay. Entries that reach `max_attempts` are dead-lettered.
    pub fn mark_failed(
        &self,
        kind: EntityKind,
        entity_id: &str,
        error: String,
        max_attempts: u32,
    ) -> Option<OutboxStatus> {
        self.with_entries(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.kind == kind && e.entity_id == entity_id)?;
            entry.attempts = entry.attempts.saturating_add(1);
            entry.last_error = Some(error);
            entry.updated_at = Utc::now();
            if entry.attempts >= max_attempts {
                entry.status = OutboxStatus::Dead;
                warn!(
                    "[Outbox] Giving up on {} {} {} after {} replays: {}",
                    entry.op,
                    kind,
                    entity_id,
                    entry.attempts,
                    entry.last_error.as_deref().unwrap_or_default()
                );
            }
            Some(entry.status)
        })
    }

    /// Dead-lettered entries, kept for inspection until cleared.
    pub fn dead_letters(&self) -> Vec<OutboxEntry> {
        self.with_entries(|entries| {
            entries
                .iter()
                .filter(|e| e.status == OutboxStatus::Dead)
                .cloned()
                .collect()
        })
    }

    pub fn clear_dead_letters(&self) -> usize {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|e| e.status != OutboxStatus::Dead);
            before - entries.len()
        })
    }

    /// Drop every pending entry of `kind`, e.g. after the local copy was
    /// replaced wholesale from the remote.
    pub fn discard_pending(&self, kind: EntityKind) -> usize {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|e| !(e.kind == kind && e.status == OutboxStatus::Pending));
            before - entries.len()
        })
    }

    pub fn pending_count(&self) -> usize {
        self.with_entries(|entries| {
            entries
                .iter()
                .filter(|e| e.status == OutboxStatus::Pending)
                .count()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.with_entries(|entries| entries.is_empty())
    }
}
