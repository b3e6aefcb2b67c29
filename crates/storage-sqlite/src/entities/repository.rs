use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;
use log::debug;

use studydeck_core::entity::Entity;
use studydeck_core::store::EntityStore;
use studydeck_core::Result;

use super::model::EntityRowDB;
use crate::db::{self, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::entities;

const INSERT_CHUNK: usize = 500;

/// [`EntityStore`] over the shared `entities` table, scoped to one kind.
pub struct SqliteEntityStore<E: Entity> {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteEntityStore<E> {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self {
            pool,
            writer,
            _kind: PhantomData,
        }
    }

    fn kind() -> &'static str {
        E::KIND.as_str()
    }
}

fn decode_rows<E: Entity>(rows: Vec<EntityRowDB>) -> std::result::Result<Vec<E>, StorageError> {
    rows.into_iter().map(EntityRowDB::into_entity).collect()
}

fn next_position(conn: &mut SqliteConnection, kind: &str) -> std::result::Result<i64, StorageError> {
    let max: Option<i64> = entities::table
        .filter(entities::kind.eq(kind))
        .select(diesel::dsl::max(entities::position))
        .first(conn)?;
    Ok(max.map_or(0, |position| position + 1))
}

/// JSON path for a top-level field, quoted so any key is accepted.
fn field_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

#[async_trait]
impl<E: Entity> EntityStore<E> for SqliteEntityStore<E> {
    async fn get_all(&self) -> Result<Vec<E>> {
        let kind = Self::kind();
        let rows: Vec<EntityRowDB> = db::read(&self.pool, move |conn| {
            Ok(entities::table
                .filter(entities::kind.eq(kind))
                .order(entities::position.asc())
                .select(EntityRowDB::as_select())
                .load(conn)?)
        })
        .await?;
        Ok(decode_rows(rows)?)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<E>> {
        let kind = Self::kind();
        let id = id.to_string();
        let row: Option<EntityRowDB> = db::read(&self.pool, move |conn| {
            Ok(entities::table
                .find((kind, id))
                .select(EntityRowDB::as_select())
                .first(conn)
                .optional()?)
        })
        .await?;
        Ok(row.map(EntityRowDB::into_entity).transpose()?)
    }

    async fn find_by_field(&self, field: &str, value: &serde_json::Value) -> Result<Vec<E>> {
        let kind = Self::kind();
        let path = field_path(field);
        let expected = serde_json::to_string(value)?;
        let rows: Vec<EntityRowDB> = db::read(&self.pool, move |conn| {
            let rows: Vec<EntityRowDB> = if expected == "null" {
                diesel::sql_query(
                    "SELECT kind, id, position, payload, updated_at FROM entities \
                     WHERE kind = ? AND json_type(payload, ?) = 'null' ORDER BY position",
                )
                .bind::<Text, _>(kind)
                .bind::<Text, _>(path)
                .load(conn)?
            } else {
                diesel::sql_query(
                    "SELECT kind, id, position, payload, updated_at FROM entities \
                     WHERE kind = ? AND json_extract(payload, ?) = json_extract(?, '$') \
                     ORDER BY position",
                )
                .bind::<Text, _>(kind)
                .bind::<Text, _>(path)
                .bind::<Text, _>(expected)
                .load(conn)?
            };
            Ok(rows)
        })
        .await?;
        Ok(decode_rows(rows)?)
    }

    async fn put(&self, entity: E) -> Result<()> {
        let id = entity.id().to_string();
        self.writer
            .exec(move |conn| {
                let row = EntityRowDB::from_entity(&entity, next_position(conn, Self::kind())?)?;
                diesel::insert_into(entities::table)
                    .values(&row)
                    .on_conflict((entities::kind, entities::id))
                    .do_update()
                    .set((
                        entities::payload.eq(&row.payload),
                        entities::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)?;
                Ok(())
            })
            .await?;
        debug!("[Storage] Stored {} {}", E::KIND, id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let kind = Self::kind();
        let id = id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(entities::table.find((kind, id))).execute(conn)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn bulk_replace(&self, replacement: Vec<E>) -> Result<()> {
        let kind = Self::kind();
        let count = replacement.len();
        self.writer
            .exec(move |conn| {
                let rows = replacement
                    .iter()
                    .enumerate()
                    .map(|(position, entity)| EntityRowDB::from_entity(entity, position as i64))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                diesel::delete(entities::table.filter(entities::kind.eq(kind))).execute(conn)?;
                for chunk in rows.chunks(INSERT_CHUNK) {
                    diesel::insert_into(entities::table)
                        .values(chunk)
                        .execute(conn)?;
                }
                Ok(())
            })
            .await?;
        debug!("[Storage] Replaced {} with {} row(s)", E::KIND.collection(), count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use studydeck_core::cards::Card;
    use studydeck_core::entity::EntitySource;
    use studydeck_core::groups::Group;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (Arc<DbPool>, WriteHandle) {
        let pool = db::init(&dir.path().join("studydeck.db")).unwrap();
        let writer = WriteHandle::new(Arc::clone(&pool));
        (pool, writer)
    }

    fn group(id: &str) -> Group {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        Group {
            id: id.to_string(),
            name: format!("Group {id}"),
            description: None,
            card_count: 0,
            study_card_count: 0,
            tags: vec!["lang".to_string()],
            is_active: true,
            source: EntitySource::UserCreated,
            created_at: now,
            updated_at: now,
        }
    }

    fn card(id: &str, group_id: &str) -> Card {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 15).unwrap();
        Card {
            id: id.to_string(),
            group_id: group_id.to_string(),
            front: "front".to_string(),
            back: "back".to_string(),
            hint: None,
            ease_factor: 2.36,
            interval: 6,
            repetitions: 2,
            next_review_date: Some(now),
            last_studied_at: None,
            tags: Vec::new(),
            is_active: true,
            source: EntitySource::UserCreated,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_overwrites_in_place_and_keeps_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, writer) = open(&dir);
        let store = SqliteEntityStore::<Card>::new(pool, writer);

        store.put(card("c-2", "g-1")).await.unwrap();
        store.put(card("c-1", "g-1")).await.unwrap();
        store.put(card("c-2", "g-2")).await.unwrap();

        let all = store.get_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-2", "c-1"]);
        assert_eq!(all[0].group_id, "g-2");
        assert_eq!(store.get_by_id("c-1").await.unwrap(), Some(card("c-1", "g-1")));
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn kinds_share_the_table_without_mixing() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, writer) = open(&dir);
        let groups = SqliteEntityStore::<Group>::new(Arc::clone(&pool), writer.clone());
        let cards = SqliteEntityStore::<Card>::new(pool, writer);

        groups.put(group("same-id")).await.unwrap();
        cards.put(card("same-id", "g-1")).await.unwrap();
        cards.bulk_replace(Vec::new()).await.unwrap();

        assert_eq!(groups.get_all().await.unwrap(), vec![group("same-id")]);
        assert!(cards.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_field_compares_json_values() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, writer) = open(&dir);
        let store = SqliteEntityStore::<Card>::new(pool, writer);
        let mut inactive = card("c-3", "g-1");
        inactive.is_active = false;
        inactive.hint = Some("think".to_string());
        store.put(card("c-1", "g-1")).await.unwrap();
        store.put(card("c-2", "g-2")).await.unwrap();
        store.put(inactive).await.unwrap();

        let in_group = store.find_by_field("groupId", &json!("g-1")).await.unwrap();
        let ids: Vec<_> = in_group.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-3"]);

        let active = store.find_by_field("isActive", &json!(true)).await.unwrap();
        assert_eq!(active.len(), 2);
        let without_hint = store.find_by_field("hint", &json!(null)).await.unwrap();
        assert_eq!(without_hint.len(), 2);
        assert_eq!(store.find_by_field("interval", &json!(6)).await.unwrap().len(), 3);
        assert!(store
            .find_by_field("group_id", &json!("g-1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_id_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, writer) = open(&dir);
        let store = SqliteEntityStore::<Group>::new(pool, writer);
        store.put(group("g-1")).await.unwrap();

        store.delete("nope").await.unwrap();
        store.delete("g-1").await.unwrap();

        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_replace_sets_contents_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, writer) = open(&dir);
        let store = SqliteEntityStore::<Group>::new(pool, writer);
        store.put(group("old")).await.unwrap();

        store
            .bulk_replace(vec![group("b"), group("a")])
            .await
            .unwrap();
        store.put(group("c")).await.unwrap();

        let ids: Vec<_> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn data_survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (pool, writer) = open(&dir);
            let store = SqliteEntityStore::<Group>::new(pool, writer);
            store.put(group("g-1")).await.unwrap();
        }

        let (pool, writer) = open(&dir);
        let store = SqliteEntityStore::<Group>::new(pool, writer);
        assert_eq!(store.get_by_id("g-1").await.unwrap(), Some(group("g-1")));
    }
}
