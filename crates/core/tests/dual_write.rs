mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{fast_config, Harness};
use studydeck_core::cards::{Card, CardUpdate, NewCard, ReviewGrade, MAX_INTERVAL_DAYS};
use studydeck_core::entity::EntityKind;
use studydeck_core::errors::{Error, RemoteError, ValidationError};
use studydeck_core::groups::{GroupUpdate, NewGroup};
use studydeck_core::starter_pack::{seed_starter_pack, STARTER_GROUP_ID};
use studydeck_core::sync::MirrorOperation;

async fn assert_counts(harness: &Harness, group_id: &str, cards: u32, study_cards: u32) {
    let group = harness.local_group(group_id).await.expect("group exists");
    assert_eq!(
        (group.card_count, group.study_card_count),
        (cards, study_cards),
        "counts of group {}",
        group_id
    );
}

#[tokio::test]
async fn create_returns_after_local_write_and_mirrors_in_background() {
    let harness = Harness::new();

    let group = harness
        .groups()
        .create(NewGroup::new("Spanish verbs"))
        .await
        .unwrap();
    assert!(harness.local_group(&group.id).await.is_some());
    assert_eq!(group.created_at, group.updated_at);

    harness.settle().await;
    assert_eq!(harness.remote_groups.row(&group.id), Some(group.clone()));
    assert_eq!(harness.remote_groups.calls_for("create"), 1);
}

#[tokio::test]
async fn local_writes_survive_an_unreachable_remote() {
    let harness = Harness::new();
    harness
        .remote_groups
        .fail_always(RemoteError::network("connection refused"));
    harness
        .remote_cards
        .fail_always(RemoteError::network("connection refused"));

    let group = harness.groups().create(NewGroup::new("Offline")).await.unwrap();
    let card = harness
        .cards()
        .create(NewCard::new(&group.id, "uno", "one"))
        .await
        .unwrap();
    let updated = harness
        .cards()
        .update(
            &card.id,
            CardUpdate {
                back: Some("1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.cards().delete(&updated.id).await.unwrap();

    assert!(harness.local_card(&card.id).await.is_none());
    assert_eq!(harness.local_group(&group.id).await.unwrap().card_count, 0);

    harness.settle().await;
    assert!(harness.remote_groups.rows().is_empty());
    let outbox = harness.session.runtime().outbox().pending(EntityKind::Card);
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].op, MirrorOperation::Delete);
    assert!(harness
        .session
        .runtime()
        .outbox()
        .contains(EntityKind::Group, &group.id));
}

#[tokio::test]
async fn transient_mirror_failure_is_retried_max_attempts_times() {
    let harness = Harness::new();
    harness
        .remote_groups
        .fail_always(RemoteError::from_status(503, "unavailable"));

    harness.groups().create(NewGroup::new("Retry me")).await.unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_groups.calls_for("create"), 3);
    assert_eq!(harness.session.runtime().outbox().pending_count(), 1);
}

#[tokio::test]
async fn auth_failure_is_not_retried_but_kept_for_replay() {
    let harness = Harness::new();
    harness
        .remote_groups
        .fail_always(RemoteError::from_status(401, "token expired"));

    let group = harness.groups().create(NewGroup::new("Auth")).await.unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_groups.calls_for("create"), 1);
    let entry = harness
        .session
        .runtime()
        .outbox()
        .get(EntityKind::Group, &group.id)
        .expect("outbox entry");
    assert_eq!(entry.last_error.as_deref(), Some("token expired"));
}

#[tokio::test]
async fn rejected_mirror_is_dropped_not_queued() {
    let harness = Harness::new();
    harness
        .remote_groups
        .fail_always(RemoteError::from_status(400, "bad payload"));

    harness.groups().create(NewGroup::new("Rejected")).await.unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_groups.calls_for("create"), 1);
    assert!(harness.session.runtime().outbox().is_empty());
}

#[tokio::test]
async fn update_of_missing_entity_is_not_found_and_writes_nothing() {
    let harness = Harness::new();
    let err = harness
        .groups()
        .update("nope", GroupUpdate::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = harness.cards().delete("nope").await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotFound {
            kind: EntityKind::Card,
            ..
        }
    ));
    assert_eq!(harness.group_store.writes() + harness.card_store.writes(), 0);
}

#[tokio::test]
async fn invalid_update_never_touches_storage() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("Valid")).await.unwrap();
    let writes_before = harness.group_store.writes();

    let err = harness
        .groups()
        .update(
            &group.id,
            GroupUpdate {
                name: Some("   ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(ValidationError::EmptyField("name"))
    ));
    assert_eq!(harness.group_store.writes(), writes_before);
    assert_eq!(harness.local_group(&group.id).await.unwrap().name, "Valid");
}

#[tokio::test]
async fn card_requires_an_existing_group() {
    let harness = Harness::new();
    let err = harness
        .cards()
        .create(NewCard::new("missing", "q", "a"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::UnknownGroup(ref id)) if id == "missing"
    ));
}

#[tokio::test]
async fn pre_assigned_ids_are_kept_and_must_be_unique() {
    let harness = Harness::new();
    let group = harness
        .groups()
        .create(NewGroup::new("Fixed").with_id("g-fixed"))
        .await
        .unwrap();
    assert_eq!(group.id, "g-fixed");

    let err = harness
        .groups()
        .create(NewGroup::new("Again").with_id("g-fixed"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DuplicateId(_))
    ));
}

#[tokio::test]
async fn derived_counts_follow_every_card_mutation() {
    let harness = Harness::new();
    let a = harness.groups().create(NewGroup::new("A")).await.unwrap();
    let b = harness.groups().create(NewGroup::new("B")).await.unwrap();

    let c1 = harness
        .cards()
        .create(NewCard::new(&a.id, "1", "one"))
        .await
        .unwrap();
    let c2 = harness
        .cards()
        .create(NewCard::new(&a.id, "2", "two"))
        .await
        .unwrap();
    harness
        .cards()
        .create(NewCard::new(&a.id, "3", "three").inactive())
        .await
        .unwrap();
    assert_counts(&harness, &a.id, 3, 2).await;

    harness
        .cards()
        .update(&c1.id, CardUpdate::move_to_group(&b.id))
        .await
        .unwrap();
    assert_counts(&harness, &a.id, 2, 1).await;
    assert_counts(&harness, &b.id, 1, 1).await;

    harness
        .cards()
        .update(
            &c2.id,
            CardUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_counts(&harness, &a.id, 2, 0).await;

    harness.cards().delete(&c1.id).await.unwrap();
    assert_counts(&harness, &b.id, 0, 0).await;
}

#[tokio::test]
async fn derived_count_writes_keep_updated_at_and_are_not_mirrored() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("Counts")).await.unwrap();
    harness.settle().await;
    harness.remote_groups.clear_calls();

    harness
        .cards()
        .create(NewCard::new(&group.id, "q", "a"))
        .await
        .unwrap();
    harness.settle().await;

    let local = harness.local_group(&group.id).await.unwrap();
    assert_eq!(local.card_count, 1);
    assert_eq!(local.updated_at, group.updated_at);
    assert!(harness.remote_groups.calls().is_empty());
}

#[tokio::test]
async fn worked_example_moves_and_cascades() {
    let harness = Harness::new();
    let g1 = harness.groups().create(NewGroup::new("G1")).await.unwrap();
    assert_eq!(g1.card_count, 0);

    let c1 = harness
        .cards()
        .create(NewCard::new(&g1.id, "front", "back"))
        .await
        .unwrap();
    assert_counts(&harness, &g1.id, 1, 1).await;

    let g2 = harness.groups().create(NewGroup::new("G2")).await.unwrap();
    harness
        .cards()
        .update(&c1.id, CardUpdate::move_to_group(&g2.id))
        .await
        .unwrap();
    assert_counts(&harness, &g1.id, 0, 0).await;
    assert_counts(&harness, &g2.id, 1, 1).await;

    harness.groups().delete(&g2.id).await.unwrap();
    assert!(harness.cards().find_by_id(&c1.id).await.unwrap().is_none());
    assert!(harness.groups().find_by_id(&g2.id).await.unwrap().is_none());

    harness.settle().await;
    assert!(harness.remote_cards.row(&c1.id).is_none());
    assert!(harness.remote_groups.row(&g2.id).is_none());
    assert!(harness.remote_groups.row(&g1.id).is_some());
}

#[tokio::test]
async fn deleting_a_group_removes_its_cards() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("Doomed")).await.unwrap();
    for i in 0..3 {
        harness
            .cards()
            .create(NewCard::new(&group.id, format!("q{}", i), "a"))
            .await
            .unwrap();
    }

    harness.groups().delete(&group.id).await.unwrap();

    let orphans = harness
        .cards()
        .find_by_field("groupId", &json!(group.id))
        .await
        .unwrap();
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn mirrors_of_one_entity_land_in_order() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("v1")).await.unwrap();
    for name in ["v2", "v3", "v4"] {
        harness
            .groups()
            .update(
                &group.id,
                GroupUpdate {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    harness.settle().await;

    assert_eq!(harness.remote_groups.row(&group.id).unwrap().name, "v4");
    let ops: Vec<_> = harness
        .remote_groups
        .calls()
        .into_iter()
        .map(|call| call.op)
        .collect();
    assert_eq!(ops, vec!["create", "update", "update", "update"]);
}

#[tokio::test]
async fn card_create_waits_for_its_new_group_to_reach_the_remote() {
    let harness = Harness::new();
    harness.remote_groups.slow_creates(Duration::from_millis(50));
    let remote_groups = Arc::clone(&harness.remote_groups);
    harness
        .remote_cards
        .require_on_create(move |card: &Card| remote_groups.row(&card.group_id).is_some());

    let group = harness.groups().create(NewGroup::new("Fresh")).await.unwrap();
    let card = harness
        .cards()
        .create(NewCard::new(&group.id, "q", "a"))
        .await
        .unwrap();
    harness.settle().await;

    assert!(harness.remote_groups.row(&group.id).is_some());
    assert!(harness.remote_cards.row(&card.id).is_some());
    assert_eq!(harness.remote_cards.calls_for("create"), 1);
    assert!(harness.session.runtime().outbox().is_empty());
}

#[tokio::test]
async fn card_of_an_unsent_group_waits_in_the_outbox() {
    let harness = Harness::new();
    let remote_groups = Arc::clone(&harness.remote_groups);
    harness
        .remote_cards
        .require_on_create(move |card: &Card| remote_groups.row(&card.group_id).is_some());
    harness
        .remote_groups
        .fail_always(RemoteError::network("offline"));

    let group = harness.groups().create(NewGroup::new("Offline")).await.unwrap();
    let card = harness
        .cards()
        .create(NewCard::new(&group.id, "q", "a"))
        .await
        .unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_cards.calls_for("create"), 0);
    let runtime = harness.session.runtime();
    let outbox = runtime.outbox();
    assert!(outbox.contains(EntityKind::Group, &group.id));
    assert!(outbox.contains(EntityKind::Card, &card.id));

    harness.remote_groups.recover();
    harness.coordinator().perform_background_sync().await.unwrap();

    assert!(harness.remote_groups.row(&group.id).is_some());
    assert!(harness.remote_cards.row(&card.id).is_some());
    assert!(harness.session.runtime().outbox().is_empty());
}

#[tokio::test]
async fn direct_mirror_success_clears_a_dead_letter() {
    let mut config = fast_config();
    config.outbox_max_attempts = 1;
    let harness = Harness::with_config(config);
    let group = harness.groups().create(NewGroup::new("v1")).await.unwrap();
    harness.settle().await;

    harness
        .remote_groups
        .fail_op("update", RemoteError::network("offline"));
    let rename = |name: &str| GroupUpdate {
        name: Some(name.to_string()),
        ..Default::default()
    };
    harness.groups().update(&group.id, rename("v2")).await.unwrap();
    harness.settle().await;
    harness.coordinator().perform_background_sync().await.unwrap();
    assert_eq!(harness.session.runtime().outbox().dead_letters().len(), 1);

    harness.remote_groups.recover();
    harness.groups().update(&group.id, rename("v3")).await.unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_groups.row(&group.id).unwrap().name, "v3");
    assert!(harness.session.runtime().outbox().is_empty());
}

#[tokio::test]
async fn starter_pack_never_reaches_the_remote() {
    let harness = Harness::new();
    let seeded = seed_starter_pack(&harness.groups(), &harness.cards())
        .await
        .unwrap();
    assert_eq!(seeded.groups_created, 1);
    assert!(seeded.cards_created > 0);

    let again = seed_starter_pack(&harness.groups(), &harness.cards())
        .await
        .unwrap();
    assert_eq!(again.groups_created + again.cards_created, 0);

    let user_card = harness
        .cards()
        .create(NewCard::new(STARTER_GROUP_ID, "mine", "added by user"))
        .await
        .unwrap();
    harness
        .groups()
        .update(
            STARTER_GROUP_ID,
            GroupUpdate {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    harness.coordinator().force_sync().await.unwrap();
    harness.cards().delete(&user_card.id).await.unwrap();
    harness.groups().delete(STARTER_GROUP_ID).await.unwrap();
    harness.settle().await;

    assert_eq!(harness.remote_calls_mentioning(STARTER_GROUP_ID), 0);
    assert_eq!(harness.remote_calls_mentioning(&user_card.id), 0);
    assert!(harness.remote_groups.rows().is_empty());
    assert!(harness.remote_cards.rows().is_empty());
}

#[tokio::test]
async fn study_queries_prioritize_new_then_hard_cards() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("Study")).await.unwrap();
    let mut ids = Vec::new();
    for front in ["a", "b", "c"] {
        let card = harness
            .cards()
            .create(NewCard::new(&group.id, front, "x"))
            .await
            .unwrap();
        ids.push(card.id);
    }

    let easy = harness
        .cards()
        .record_review(&ids[0], ReviewGrade::Easy)
        .await
        .unwrap();
    let hard = harness
        .cards()
        .record_review(&ids[1], ReviewGrade::Again)
        .await
        .unwrap();
    assert!(hard.ease_factor < easy.ease_factor);
    assert_eq!(hard.interval, 1);
    assert!(easy.last_studied_at.is_some());

    let session = harness
        .cards()
        .study_session_cards(Some(&group.id), 2)
        .await
        .unwrap();
    let session_ids: Vec<_> = session.iter().map(|c| c.id.clone()).collect();
    assert_eq!(session_ids, vec![ids[2].clone(), ids[1].clone()]);

    let due = harness
        .cards()
        .cards_due_for_review(chrono::Utc::now())
        .await
        .unwrap();
    let due_ids: Vec<_> = due.iter().map(|c| c.id.clone()).collect();
    assert_eq!(due_ids, vec![ids[2].clone()]);
}

#[tokio::test]
async fn long_review_streaks_keep_a_bounded_schedule() {
    let harness = Harness::new();
    let group = harness.groups().create(NewGroup::new("Streak")).await.unwrap();
    let card = harness
        .cards()
        .create(NewCard::new(&group.id, "q", "a"))
        .await
        .unwrap();

    let mut reviewed = card.clone();
    for _ in 0..20 {
        reviewed = harness
            .cards()
            .record_review(&card.id, ReviewGrade::Easy)
            .await
            .unwrap();
    }
    assert_eq!(reviewed.interval, MAX_INTERVAL_DAYS);
    assert!(reviewed.next_review_date.is_some());

    let err = harness
        .cards()
        .update(
            &card.id,
            CardUpdate {
                interval: Some(200_000_000),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::OutOfRange {
            field: "interval",
            ..
        })
    ));

    let again = harness
        .cards()
        .record_review(&card.id, ReviewGrade::Good)
        .await
        .unwrap();
    assert_eq!(again.interval, MAX_INTERVAL_DAYS);
}

#[tokio::test]
async fn cloud_only_mode_reads_and_writes_the_remote_directly() {
    let mut config = fast_config();
    config.local_cache_enabled = false;
    let harness = Harness::with_config(config);

    let group = harness.groups().create(NewGroup::new("Cloud")).await.unwrap();
    assert!(harness.remote_groups.row(&group.id).is_some());
    assert_eq!(harness.group_store.writes(), 0);

    let card = harness
        .cards()
        .create(NewCard::new(&group.id, "q", "a"))
        .await
        .unwrap();
    assert_eq!(harness.remote_groups.row(&group.id).unwrap().card_count, 1);
    assert_eq!(
        harness.groups().find_all().await.unwrap().len(),
        harness.remote_groups.rows().len()
    );

    harness
        .remote_cards
        .fail_always(RemoteError::network("offline"));
    let err = harness.cards().delete(&card.id).await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(harness.card_store.writes(), 0);

    let seeded = seed_starter_pack(&harness.groups(), &harness.cards())
        .await
        .unwrap();
    assert_eq!(seeded.groups_created, 0);
}
