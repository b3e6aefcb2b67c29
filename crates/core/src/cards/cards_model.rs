//! Card domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, EntitySource};
use crate::errors::ValidationError;

/// SM-2 starting ease factor.
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// SM-2 floor for the ease factor.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Longest review interval, in days.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// A single flashcard belonging to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub group_id: String,
    pub front: String,
    pub back: String,
    pub hint: Option<String>,
    pub ease_factor: f64,
    /// Days until the next review.
    pub interval: u32,
    pub repetitions: u32,
    pub next_review_date: Option<DateTime<Utc>>,
    pub last_studied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_active: bool,
    #[serde(default)]
    pub source: EntitySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// True until the card has been reviewed at least once.
    pub fn is_unreviewed(&self) -> bool {
        self.last_studied_at.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_review_date.map_or(true, |due| due <= now)
    }
}

impl Entity for Card {
    const KIND: EntityKind = EntityKind::Card;
    const PARENT_FIELD: Option<&'static str> = Some("groupId");
    const PARENT_KIND: Option<EntityKind> = Some(EntityKind::Group);

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn source(&self) -> EntitySource {
        self.source
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.group_id)
    }
}

/// Input model for creating a new card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCard {
    pub id: Option<String>,
    pub group_id: String,
    pub front: String,
    pub back: String,
    pub hint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_active: bool,
    #[serde(default)]
    pub source: EntitySource,
}

impl NewCard {
    pub fn new(
        group_id: impl Into<String>,
        front: impl Into<String>,
        back: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            group_id: group_id.into(),
            front: front.into(),
            back: back.into(),
            hint: None,
            tags: Vec::new(),
            is_active: true,
            source: EntitySource::UserCreated,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.group_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("groupId"));
        }
        if self.front.trim().is_empty() {
            return Err(ValidationError::EmptyField("front"));
        }
        if self.back.trim().is_empty() {
            return Err(ValidationError::EmptyField("back"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(ValidationError::EmptyField("id"));
            }
        }
        Ok(())
    }

    pub(crate) fn into_card(self, id: String, now: DateTime<Utc>) -> Card {
        Card {
            id,
            group_id: self.group_id,
            front: self.front,
            back: self.back,
            hint: self.hint,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval: 0,
            repetitions: 0,
            next_review_date: None,
            last_studied_at: None,
            tags: self.tags,
            is_active: self.is_active,
            source: self.source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a card. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    pub group_id: Option<String>,
    pub front: Option<String>,
    pub back: Option<String>,
    pub hint: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub ease_factor: Option<f64>,
    pub interval: Option<u32>,
    pub repetitions: Option<u32>,
    pub next_review_date: Option<Option<DateTime<Utc>>>,
    pub last_studied_at: Option<Option<DateTime<Utc>>>,
}

impl CardUpdate {
    pub fn move_to_group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if matches!(&self.group_id, Some(v) if v.trim().is_empty()) {
            return Err(ValidationError::EmptyField("groupId"));
        }
        if matches!(&self.front, Some(v) if v.trim().is_empty()) {
            return Err(ValidationError::EmptyField("front"));
        }
        if matches!(&self.back, Some(v) if v.trim().is_empty()) {
            return Err(ValidationError::EmptyField("back"));
        }
        if let Some(ease) = self.ease_factor {
            if !ease.is_finite() || ease < MIN_EASE_FACTOR {
                return Err(ValidationError::OutOfRange {
                    field: "easeFactor",
                    message: format!("must be at least {}", MIN_EASE_FACTOR),
                });
            }
        }
        if matches!(self.interval, Some(days) if days > MAX_INTERVAL_DAYS) {
            return Err(ValidationError::OutOfRange {
                field: "interval",
                message: format!("must be at most {} days", MAX_INTERVAL_DAYS),
            });
        }
        Ok(())
    }

    pub(crate) fn apply_to(self, card: &mut Card) {
        if let Some(group_id) = self.group_id {
            card.group_id = group_id;
        }
        if let Some(front) = self.front {
            card.front = front;
        }
        if let Some(back) = self.back {
            card.back = back;
        }
        if let Some(hint) = self.hint {
            card.hint = hint;
        }
        if let Some(tags) = self.tags {
            card.tags = tags;
        }
        if let Some(is_active) = self.is_active {
            card.is_active = is_active;
        }
        if let Some(ease_factor) = self.ease_factor {
            card.ease_factor = ease_factor;
        }
        if let Some(interval) = self.interval {
            card.interval = interval;
        }
        if let Some(repetitions) = self.repetitions {
            card.repetitions = repetitions;
        }
        if let Some(next_review_date) = self.next_review_date {
            card.next_review_date = next_review_date;
        }
        if let Some(last_studied_at) = self.last_studied_at {
            card.last_studied_at = last_studied_at;
        }
    }
}
