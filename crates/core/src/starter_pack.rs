//! Built-in starter deck seeded on first launch. Local-only: never mirrored
//! or synced.

use log::{debug, info};

use crate::cards::{CardRepository, NewCard};
use crate::entity::EntitySource;
use crate::errors::Result;
use crate::groups::{GroupRepository, NewGroup};

pub const STARTER_GROUP_ID: &str = "starter-pack-getting-started";

/// (id, front, back, hint)
const STARTER_CARDS: &[(&str, &str, &str, Option<&str>)] = &[
    (
        "starter-pack-card-1",
        "What does studydeck do with a card you mark as \"Again\"?",
        "It shows the card again tomorrow and lowers its ease factor.",
        Some("Think of the SM-2 reset"),
    ),
    (
        "starter-pack-card-2",
        "Where are your cards stored when you are offline?",
        "On this device. They sync to your account when you reconnect.",
        None,
    ),
    (
        "starter-pack-card-3",
        "Which cards come first in a study session?",
        "Cards you have never studied, then the ones you find hardest.",
        None,
    ),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StarterPackSeed {
    pub groups_created: usize,
    pub cards_created: usize,
}

/// Seed the starter deck. Entities that already exist are left untouched, so
/// seeding twice is a no-op. Skipped when the local cache is disabled.
pub async fn seed_starter_pack(
    groups: &GroupRepository,
    cards: &CardRepository,
) -> Result<StarterPackSeed> {
    let mut seed = StarterPackSeed::default();
    if !groups.local_cache_enabled() {
        debug!("[StarterPack] Local cache disabled; not seeding");
        return Ok(seed);
    }

    if groups.find_by_id(STARTER_GROUP_ID).await?.is_none() {
        groups
            .create(
                NewGroup::new("Getting started")
                    .with_id(STARTER_GROUP_ID)
                    .with_description("A few cards to show how studying works")
                    .with_source(EntitySource::StarterPack),
            )
            .await?;
        seed.groups_created += 1;
    }

    for (id, front, back, hint) in STARTER_CARDS {
        if cards.find_by_id(id).await?.is_some() {
            continue;
        }
        let mut card = NewCard::new(STARTER_GROUP_ID, *front, *back)
            .with_id(*id)
            .with_source(EntitySource::StarterPack);
        if let Some(hint) = hint {
            card = card.with_hint(*hint);
        }
        cards.create(card).await?;
        seed.cards_created += 1;
    }

    if seed != StarterPackSeed::default() {
        info!(
            "[StarterPack] Seeded {} group(s) and {} card(s)",
            seed.groups_created, seed.cards_created
        );
    }
    Ok(seed)
}
