//! Last-writer-wins reconciliation between local and remote entity sets.
//!
//! Everything here is pure; the coordinator performs the writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// Which side a reconciliation pass writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

/// Outcome of comparing one local and one remote version of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Only the remote side has it.
    CreateLocal,
    /// Only the local side has it.
    CreateRemote,
    /// Local version is newer.
    PushLocal,
    /// Remote version is newer.
    PullRemote,
    InSync,
}

/// A write the coordinator should perform.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction<E> {
    CreateRemote(E),
    UpdateRemote(E),
    CreateLocal(E),
    UpdateLocal(E),
}

impl<E: Entity> SyncAction<E> {
    pub fn entity(&self) -> &E {
        match self {
            Self::CreateRemote(e) | Self::UpdateRemote(e) | Self::CreateLocal(e) | Self::UpdateLocal(e) => e,
        }
    }
}

/// True when the remote version should overwrite the local one.
pub fn remote_wins(local_updated_at: DateTime<Utc>, remote_updated_at: DateTime<Utc>) -> bool {
    remote_updated_at > local_updated_at
}

/// Compare two versions of the same id. `None` means absent on that side.
pub fn resolve<E: Entity>(local: Option<&E>, remote: Option<&E>) -> Resolution {
    match (local, remote) {
        (None, None) => Resolution::InSync,
        (None, Some(_)) => Resolution::CreateLocal,
        (Some(_), None) => Resolution::CreateRemote,
        (Some(l), Some(r)) => {
            if remote_wins(l.updated_at(), r.updated_at()) {
                Resolution::PullRemote
            } else if remote_wins(r.updated_at(), l.updated_at()) {
                Resolution::PushLocal
            } else {
                Resolution::InSync
            }
        }
    }
}

/// Decide the action for one id in a pass going `direction`.
///
/// A push pass only writes remotely and a pull pass only writes locally;
/// resolutions that need the other direction are left for the other pass.
pub fn decide<E: Entity>(
    direction: SyncDirection,
    local: Option<&E>,
    remote: Option<&E>,
) -> Option<SyncAction<E>> {
    match (direction, resolve(local, remote)) {
        (SyncDirection::Push, Resolution::CreateRemote) => local.cloned().map(SyncAction::CreateRemote),
        (SyncDirection::Push, Resolution::PushLocal) => local.cloned().map(SyncAction::UpdateRemote),
        (SyncDirection::Pull, Resolution::CreateLocal) => remote.cloned().map(SyncAction::CreateLocal),
        (SyncDirection::Pull, Resolution::PullRemote) => remote.cloned().map(SyncAction::UpdateLocal),
        _ => None,
    }
}

/// Pair full local and remote sets by id and collect the actions for one pass.
///
/// Entities rejected by `include` are removed from both sides before
/// comparison. Actions follow local order, then remote-only entities in
/// remote order.
pub fn plan<E: Entity>(
    direction: SyncDirection,
    local: &[E],
    remote: &[E],
    include: impl Fn(&E) -> bool,
) -> Vec<SyncAction<E>> {
    let local: Vec<&E> = local.iter().filter(|e| include(e)).collect();
    let remote: Vec<&E> = remote.iter().filter(|e| include(e)).collect();

    let remote_by_id: HashMap<&str, &E> = remote.iter().map(|e| (e.id(), *e)).collect();
    let local_by_id: HashMap<&str, &E> = local.iter().map(|e| (e.id(), *e)).collect();

    let mut actions = Vec::new();
    for entity in &local {
        let counterpart = remote_by_id.get(entity.id()).copied();
        if let Some(action) = decide(direction, Some(*entity), counterpart) {
            actions.push(action);
        }
    }
    for entity in &remote {
        if local_by_id.contains_key(entity.id()) {
            continue;
        }
        if let Some(action) = decide(direction, None, Some(*entity)) {
            actions.push(action);
        }
    }
    actions
}
