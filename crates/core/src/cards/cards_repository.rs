use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use uuid::Uuid;

use crate::entity::{Entity, EntitySource};
use crate::errors::{Result, ValidationError};
use crate::groups::Group;
use crate::repository::{recompute_group_counts, DualWriteRepository};

use super::review::{schedule_review, ReviewGrade};
use super::{Card, CardUpdate, NewCard};

/// Card operations on top of the dual-write layer.
///
/// Every create, group move, activation change and delete recomputes the
/// derived counts of the affected groups before returning.
pub struct CardRepository {
    cards: Arc<DualWriteRepository<Card>>,
    groups: Arc<DualWriteRepository<Group>>,
}

impl CardRepository {
    pub fn new(
        cards: Arc<DualWriteRepository<Card>>,
        groups: Arc<DualWriteRepository<Group>>,
    ) -> Self {
        Self { cards, groups }
    }

    /// Create a card in an existing group. Cards added to a starter pack
    /// group stay local like the group itself.
    pub async fn create(&self, new_card: NewCard) -> Result<Card> {
        new_card.validate()?;
        let _gate = self.cards.runtime().write_gate().read().await;

        let group = self.require_group(&new_card.group_id).await?;
        let id = match new_card.id.as_deref().map(str::trim) {
            Some(id) => {
                if self.cards.find_by_id(id).await?.is_some() {
                    return Err(ValidationError::DuplicateId(id.to_string()).into());
                }
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut card = new_card.into_card(id, Utc::now());
        if group.source == EntitySource::StarterPack {
            card.source = EntitySource::StarterPack;
        }
        let card = self.cards.insert(card).await?;
        recompute_group_counts(&self.groups, &self.cards, &card.group_id).await?;
        debug!("[Cards] Created card {} in group {}", card.id, card.group_id);
        Ok(card)
    }

    pub async fn update(&self, id: &str, update: CardUpdate) -> Result<Card> {
        let _gate = self.cards.runtime().write_gate().read().await;
        let existing = self.cards.require(id).await?;
        self.apply_update(existing, update).await
    }

    /// Grade a review and reschedule the card (SM-2).
    pub async fn record_review(&self, id: &str, grade: ReviewGrade) -> Result<Card> {
        let _gate = self.cards.runtime().write_gate().read().await;
        let existing = self.cards.require(id).await?;
        let update = schedule_review(&existing, grade, Utc::now())?;
        let card = self.apply_update(existing, update).await?;
        debug!(
            "[Cards] Reviewed card {} ({:?}); next review in {} day(s)",
            card.id, grade, card.interval
        );
        Ok(card)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let _gate = self.cards.runtime().write_gate().read().await;
        let card = self.cards.require(id).await?;
        self.cards.remove(&card).await?;
        recompute_group_counts(&self.groups, &self.cards, &card.group_id).await?;
        Ok(())
    }

    pub async fn find_all(&self) -> Result<Vec<Card>> {
        self.cards.find_all().await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Card>> {
        self.cards.find_by_id(id).await
    }

    pub async fn find_by_field(&self, field: &str, value: &serde_json::Value) -> Result<Vec<Card>> {
        self.cards.find_by_field(field, value).await
    }

    pub async fn cards_for_group(&self, group_id: &str) -> Result<Vec<Card>> {
        self.cards.find_by_parent(group_id).await
    }

    /// Active cards whose review date has passed, oldest due date first.
    /// Never-scheduled cards come first.
    pub async fn cards_due_for_review(&self, now: DateTime<Utc>) -> Result<Vec<Card>> {
        let mut due: Vec<Card> = self
            .cards
            .find_all()
            .await?
            .into_iter()
            .filter(|card| card.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            a.next_review_date
                .cmp(&b.next_review_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(due)
    }

    /// Up to `limit` active cards for a study session: never-studied cards
    /// first (oldest first), then the hardest cards by ease factor.
    pub async fn study_session_cards(
        &self,
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Card>> {
        let candidates = match group_id {
            Some(group_id) => self.cards.find_by_parent(group_id).await?,
            None => self.cards.find_all().await?,
        };
        let mut session: Vec<Card> = candidates.into_iter().filter(|card| card.is_active).collect();
        session.sort_by(study_priority);
        session.truncate(limit);
        Ok(session)
    }

    async fn require_group(&self, group_id: &str) -> Result<Group> {
        self.groups
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownGroup(group_id.to_string()).into())
    }

    /// Merge, stamp and store an update. The caller holds the write gate.
    async fn apply_update(&self, existing: Card, update: CardUpdate) -> Result<Card> {
        update.validate()?;
        if let Some(target) = update.group_id.as_deref() {
            if target != existing.group_id {
                self.require_group(target).await?;
            }
        }

        let previous_group = existing.group_id.clone();
        let was_active = existing.is_active;
        let mut card = existing;
        update.apply_to(&mut card);
        card.touch(Utc::now());
        let card = self.cards.replace(card).await?;

        if card.group_id != previous_group {
            recompute_group_counts(&self.groups, &self.cards, &previous_group).await?;
            recompute_group_counts(&self.groups, &self.cards, &card.group_id).await?;
        } else if card.is_active != was_active {
            recompute_group_counts(&self.groups, &self.cards, &card.group_id).await?;
        }
        Ok(card)
    }
}

fn study_priority(a: &Card, b: &Card) -> Ordering {
    match (a.is_unreviewed(), b.is_unreviewed()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.created_at.cmp(&b.created_at),
        (false, false) => a
            .ease_factor
            .total_cmp(&b.ease_factor)
            .then_with(|| a.next_review_date.cmp(&b.next_review_date)),
    }
}
