//! Group domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind, EntitySource};
use crate::errors::ValidationError;

/// A named collection of cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Number of cards in the group. Derived, never set by callers.
    pub card_count: u32,
    /// Number of active cards in the group. Derived, never set by callers.
    pub study_card_count: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_active: bool,
    #[serde(default)]
    pub source: EntitySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Group {
    const KIND: EntityKind = EntityKind::Group;

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
}

/// Input model for creating a new group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    /// Pre-assigned id, required when seeding well-known fixtures.
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_active: bool,
    #[serde(default)]
    pub source: EntitySource,
}

impl NewGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            tags: Vec::new(),
            is_active: true,
            source: EntitySource::UserCreated,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(ValidationError::EmptyField("id"));
            }
        }
        Ok(())
    }

    pub(crate) fn into_group(self, id: String, now: DateTime<Utc>) -> Group {
        Group {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            card_count: 0,
            study_card_count: 0,
            tags: self.tags,
            is_active: self.is_active,
            source: self.source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a group. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl GroupUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyField("name"));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_to(self, group: &mut Group) {
        if let Some(name) = self.name {
            group.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            group.description = description;
        }
        if let Some(tags) = self.tags {
            group.tags = tags;
        }
        if let Some(is_active) = self.is_active {
            group.is_active = is_active;
        }
    }
}
