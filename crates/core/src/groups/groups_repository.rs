use std::sync::Arc;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use crate::cards::Card;
use crate::entity::Entity;
use crate::errors::{Error, Result, ValidationError};
use crate::repository::{recompute_group_counts, DualWriteRepository};

use super::{Group, GroupUpdate, NewGroup};

/// Group operations on top of the dual-write layer.
///
/// Deleting a group cascades to its cards.
pub struct GroupRepository {
    groups: Arc<DualWriteRepository<Group>>,
    cards: Arc<DualWriteRepository<Card>>,
}

impl GroupRepository {
    pub fn new(
        groups: Arc<DualWriteRepository<Group>>,
        cards: Arc<DualWriteRepository<Card>>,
    ) -> Self {
        Self { groups, cards }
    }

    pub fn local_cache_enabled(&self) -> bool {
        self.groups.local_cache_enabled()
    }

    pub async fn create(&self, new_group: NewGroup) -> Result<Group> {
        new_group.validate()?;
        let _gate = self.groups.runtime().write_gate().read().await;

        let id = match new_group.id.as_deref().map(str::trim) {
            Some(id) => {
                if self.groups.find_by_id(id).await?.is_some() {
                    return Err(ValidationError::DuplicateId(id.to_string()).into());
                }
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let group = self.groups.insert(new_group.into_group(id, Utc::now())).await?;
        debug!("[Groups] Created group {}", group.id);
        Ok(group)
    }

    pub async fn update(&self, id: &str, update: GroupUpdate) -> Result<Group> {
        let _gate = self.groups.runtime().write_gate().read().await;
        let mut group = self.groups.require(id).await?;
        update.validate()?;

        update.apply_to(&mut group);
        group.touch(Utc::now());
        self.groups.replace(group).await
    }

    /// Delete the group's cards, then the group.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _gate = self.groups.runtime().write_gate().read().await;
        let group = self.groups.require(id).await?;

        let cards = self.cards.find_by_parent(id).await?;
        for card in &cards {
            self.cards.remove(card).await?;
        }
        self.groups.remove(&group).await?;
        debug!("[Groups] Deleted group {} with {} card(s)", id, cards.len());
        Ok(())
    }

    pub async fn find_all(&self) -> Result<Vec<Group>> {
        self.groups.find_all().await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Group>> {
        self.groups.find_by_id(id).await
    }

    pub async fn find_by_field(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<Group>> {
        self.groups.find_by_field(field, value).await
    }

    /// Active groups that have at least one card to study.
    pub async fn studyable_groups(&self) -> Result<Vec<Group>> {
        Ok(self
            .groups
            .find_all()
            .await?
            .into_iter()
            .filter(|group| group.is_active && group.study_card_count > 0)
            .collect())
    }

    /// Recount the cards of a group and return the refreshed group.
    pub async fn refresh_counts(&self, id: &str) -> Result<Group> {
        let _gate = self.groups.runtime().write_gate().read().await;
        recompute_group_counts(&self.groups, &self.cards, id)
            .await?
            .ok_or_else(|| Error::not_found(Group::KIND, id))
    }
}
