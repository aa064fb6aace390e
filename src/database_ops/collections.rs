//! User collections: ordered game membership, never touched by sync.
use chrono::Utc;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use tracing::{info, instrument};

use crate::database_ops::db::Db;
use crate::error::{LibraryError, LibraryResult};
use crate::model::{Collection, CoverStrategy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_strategy: CoverStrategy,
}

/// Partial update; absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cover_strategy: Option<CoverStrategy>,
}

fn validate_name(name: &str) -> LibraryResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LibraryError::invalid_input("collection name must not be empty"));
    }
    Ok(name.to_string())
}

fn collection_from_row(row: &SqliteRow, game_ids: Vec<i64>) -> sqlx::Result<Collection> {
    let strategy: String = row.try_get("cover_strategy")?;
    Ok(Collection {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        cover_strategy: CoverStrategy::parse(&strategy),
        game_ids,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn member_ids<'e, E: SqliteExecutor<'e>>(ex: E, collection_id: i64) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar("SELECT game_id FROM collection_games WHERE collection_id = ? ORDER BY position")
        .bind(collection_id)
        .fetch_all(ex)
        .await
}

async fn ensure_exists(conn: &mut SqliteConnection, collection_id: i64) -> LibraryResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM collections WHERE id = ?")
        .bind(collection_id)
        .fetch_optional(&mut *conn)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| LibraryError::not_found("collection", collection_id))
}

async fn touch(conn: &mut SqliteConnection, collection_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE collections SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(collection_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[instrument(skip(db, new), fields(name = %new.name))]
pub async fn create(db: &Db, new: &NewCollection) -> LibraryResult<Collection> {
    let name = validate_name(&new.name)?;
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO collections (name, description, cover_strategy, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&name)
    .bind(new.description.as_deref())
    .bind(new.cover_strategy.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&db.pool)
    .await?;
    info!(collection_id = id, "collection created");
    get(db, id).await
}

pub async fn get(db: &Db, collection_id: i64) -> LibraryResult<Collection> {
    let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
        .bind(collection_id)
        .fetch_optional(&db.pool)
        .await?
        .ok_or_else(|| LibraryError::not_found("collection", collection_id))?;
    let ids = member_ids(&db.pool, collection_id).await?;
    Ok(collection_from_row(&row, ids)?)
}

pub async fn list(db: &Db) -> LibraryResult<Vec<Collection>> {
    let rows = sqlx::query("SELECT * FROM collections ORDER BY name COLLATE NOCASE, id")
        .fetch_all(&db.pool)
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id")?;
        let ids = member_ids(&db.pool, id).await?;
        out.push(collection_from_row(&row, ids)?);
    }
    Ok(out)
}

pub async fn update(db: &Db, collection_id: i64, patch: &CollectionPatch) -> LibraryResult<Collection> {
    let current = get(db, collection_id).await?;
    let name = match &patch.name {
        Some(n) => validate_name(n)?,
        None => current.name,
    };
    let description = patch.description.clone().or(current.description);
    let strategy = patch.cover_strategy.unwrap_or(current.cover_strategy);
    sqlx::query(
        "UPDATE collections SET name = ?, description = ?, cover_strategy = ?, updated_at = ? WHERE id = ?",
    )
    .bind(name)
    .bind(description)
    .bind(strategy.as_str())
    .bind(Utc::now())
    .bind(collection_id)
    .execute(&db.pool)
    .await?;
    get(db, collection_id).await
}

pub async fn delete(db: &Db, collection_id: i64) -> LibraryResult<()> {
    let affected = sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(collection_id)
        .execute(&db.pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(LibraryError::not_found("collection", collection_id));
    }
    info!(collection_id, "collection deleted");
    Ok(())
}

/// Append a game at the end of the collection. Adding a member twice is a no-op.
pub async fn add_game(db: &Db, collection_id: i64, game_id: i64) -> LibraryResult<Collection> {
    let mut tx = db.pool.begin().await?;
    ensure_exists(&mut tx, collection_id).await?;
    let game: Option<i64> = sqlx::query_scalar("SELECT id FROM games WHERE id = ?")
        .bind(game_id)
        .fetch_optional(&mut *tx)
        .await?;
    if game.is_none() {
        return Err(LibraryError::not_found("game", game_id));
    }
    sqlx::query(
        "INSERT OR IGNORE INTO collection_games (collection_id, game_id, position, added_at)
         SELECT ?, ?, COALESCE(MAX(position) + 1, 0), ? FROM collection_games WHERE collection_id = ?",
    )
    .bind(collection_id)
    .bind(game_id)
    .bind(Utc::now())
    .bind(collection_id)
    .execute(&mut *tx)
    .await?;
    touch(&mut tx, collection_id).await?;
    tx.commit().await?;
    get(db, collection_id).await
}

pub async fn remove_game(db: &Db, collection_id: i64, game_id: i64) -> LibraryResult<Collection> {
    let mut tx = db.pool.begin().await?;
    ensure_exists(&mut tx, collection_id).await?;
    let removed = sqlx::query("DELETE FROM collection_games WHERE collection_id = ? AND game_id = ?")
        .bind(collection_id)
        .bind(game_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(LibraryError::not_found("collection member", format!("{collection_id}/{game_id}")));
    }
    let remaining = member_ids(&mut *tx, collection_id).await?;
    write_positions(&mut tx, collection_id, &remaining).await?;
    touch(&mut tx, collection_id).await?;
    tx.commit().await?;
    get(db, collection_id).await
}

/// Replace the member order. `game_ids` must be a permutation of the current members.
pub async fn reorder(db: &Db, collection_id: i64, game_ids: &[i64]) -> LibraryResult<Collection> {
    let mut tx = db.pool.begin().await?;
    ensure_exists(&mut tx, collection_id).await?;
    let mut current = member_ids(&mut *tx, collection_id).await?;
    let mut requested = game_ids.to_vec();
    current.sort_unstable();
    requested.sort_unstable();
    if current != requested {
        return Err(LibraryError::invalid_input(
            "new order must list exactly the collection's current games",
        ));
    }
    write_positions(&mut tx, collection_id, game_ids).await?;
    touch(&mut tx, collection_id).await?;
    tx.commit().await?;
    get(db, collection_id).await
}

async fn write_positions(conn: &mut SqliteConnection, collection_id: i64, ordered: &[i64]) -> sqlx::Result<()> {
    for (position, game_id) in ordered.iter().enumerate() {
        sqlx::query("UPDATE collection_games SET position = ? WHERE collection_id = ? AND game_id = ?")
            .bind(position as i64)
            .bind(collection_id)
            .bind(game_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn collections_for_game(db: &Db, game_id: i64) -> LibraryResult<Vec<Collection>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT collection_id FROM collection_games WHERE game_id = ? ORDER BY collection_id",
    )
    .bind(game_id)
    .fetch_all(&db.pool)
    .await?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        out.push(get(db, id).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::games;
    use crate::model::Game;

    async fn seed_games(db: &Db, titles: &[&str]) -> Vec<i64> {
        let mut conn = db.pool.acquire().await.unwrap();
        let mut ids = Vec::new();
        for t in titles {
            ids.push(games::insert(&mut conn, &Game::new(0, *t, t.to_lowercase())).await.unwrap());
        }
        ids
    }

    fn named(name: &str) -> NewCollection {
        NewCollection {
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn membership_keeps_order_and_compacts_on_removal() {
        let db = Db::connect_memory().await.unwrap();
        let ids = seed_games(&db, &["Celeste", "Hades", "Inside"]).await;
        let c = create(&db, &named("Couch co-op")).await.unwrap();
        for id in &ids {
            add_game(&db, c.id, *id).await.unwrap();
        }
        // Duplicate add is ignored.
        let c = add_game(&db, c.id, ids[0]).await.unwrap();
        assert_eq!(c.game_ids, ids);

        let c = remove_game(&db, c.id, ids[1]).await.unwrap();
        assert_eq!(c.game_ids, vec![ids[0], ids[2]]);
        let positions: Vec<i64> = sqlx::query_scalar(
            "SELECT position FROM collection_games WHERE collection_id = ? ORDER BY position",
        )
        .bind(c.id)
        .fetch_all(&db.pool)
        .await
        .unwrap();
        assert_eq!(positions, vec![0, 1]);

        let c = reorder(&db, c.id, &[ids[2], ids[0]]).await.unwrap();
        assert_eq!(c.game_ids, vec![ids[2], ids[0]]);
        assert!(reorder(&db, c.id, &[ids[2]]).await.is_err());
    }

    #[tokio::test]
    async fn update_delete_and_lookup_by_game() {
        let db = Db::connect_memory().await.unwrap();
        let ids = seed_games(&db, &["Outer Wilds"]).await;
        let c = create(&db, &named("  Favourites ")).await.unwrap();
        assert_eq!(c.name, "Favourites");
        add_game(&db, c.id, ids[0]).await.unwrap();

        let c = update(
            &db,
            c.id,
            &CollectionPatch {
                cover_strategy: Some(CoverStrategy::Mosaic),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(c.cover_strategy, CoverStrategy::Mosaic);
        assert_eq!(c.name, "Favourites");

        let found = collections_for_game(&db, ids[0]).await.unwrap();
        assert_eq!(found.len(), 1);

        delete(&db, c.id).await.unwrap();
        assert!(matches!(get(&db, c.id).await, Err(LibraryError::NotFound { .. })));
        assert!(collections_for_game(&db, ids[0]).await.unwrap().is_empty());
        assert!(create(&db, &named("   ")).await.is_err());
    }

    #[tokio::test]
    async fn unknown_game_or_collection_is_not_found() {
        let db = Db::connect_memory().await.unwrap();
        let c = create(&db, &named("Empty")).await.unwrap();
        assert!(matches!(add_game(&db, c.id, 999).await, Err(LibraryError::NotFound { .. })));
        assert!(matches!(add_game(&db, 999, 1).await, Err(LibraryError::NotFound { .. })));
    }
}
