//! Upkeep of the derived `cardCount` / `studyCardCount` fields of a group.

use log::debug;
use serde_json::json;

use crate::cards::Card;
use crate::groups::Group;
use crate::Result;

use super::DualWriteRepository;

/// Recount the cards of `group_id` and store the result on the group.
///
/// Counts are derived locally: the write keeps `updatedAt` and is not
/// mirrored, and nothing is written when the counts are unchanged. Returns
/// `None` when the group does not exist. Callers hold the write gate.
pub(crate) async fn recompute_group_counts(
    groups: &DualWriteRepository<Group>,
    cards: &DualWriteRepository<Card>,
    group_id: &str,
) -> Result<Option<Group>> {
    let Some(mut group) = groups.find_by_id(group_id).await? else {
        return Ok(None);
    };
    let members = cards.find_by_parent(group_id).await?;
    let card_count = members.len() as u32;
    let study_card_count = members.iter().filter(|card| card.is_active).count() as u32;

    if group.card_count == card_count && group.study_card_count == study_card_count {
        return Ok(Some(group));
    }

    debug!(
        "[Counts] Group {}: cards {} -> {}, study cards {} -> {}",
        group_id, group.card_count, card_count, group.study_card_count, study_card_count
    );
    group.card_count = card_count;
    group.study_card_count = study_card_count;
    let changes = json!({
        "cardCount": card_count,
        "studyCardCount": study_card_count,
    });
    groups.write_derived(group, changes).await.map(Some)
}
