//! Canonical game rows, aliases, identity merges and library reads.
use std::collections::HashMap;

use indexmap::IndexSet;
use itertools::Itertools;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use tracing::{info, instrument, warn};

use crate::database_ops::db::{bump_generation, generation, Db};
use crate::database_ops::ownership;
use crate::error::{LibraryError, LibraryResult};
use crate::matching::LibraryIndex;
use crate::merge::{self as layers, apply_override, refresh_resolved, resolve_nsfw};
use crate::model::{
    Game, GameFields, GameOverride, LibraryEntry, MetadataLayers, Ratings,
};

const WRITE_COLUMNS: &str = "canonical_title, match_key, igdb_id, description, developers, genres, \
     release_date, cover_image_url, rating_community, rating_critic, rating_aggregated, popularity, \
     hidden, nsfw, override_layer, metadata_layer, store_layer, metadata_fetched_at, \
     metadata_checked_at, created_at, updated_at";

fn game_from_row(row: &SqliteRow) -> sqlx::Result<Game> {
    let developers: Json<IndexSet<String>> = row.try_get("developers")?;
    let genres: Json<IndexSet<String>> = row.try_get("genres")?;
    let overrides: Json<GameOverride> = row.try_get("override_layer")?;
    let metadata: Json<GameFields> = row.try_get("metadata_layer")?;
    let store: Json<GameFields> = row.try_get("store_layer")?;
    Ok(Game {
        id: row.try_get("id")?,
        canonical_title: row.try_get("canonical_title")?,
        match_key: row.try_get("match_key")?,
        igdb_id: row.try_get("igdb_id")?,
        fields: GameFields {
            description: row.try_get("description")?,
            developers: developers.0,
            genres: genres.0,
            release_date: row.try_get("release_date")?,
            cover_image_url: row.try_get("cover_image_url")?,
            ratings: Ratings {
                community: row.try_get("rating_community")?,
                critic: row.try_get("rating_critic")?,
                aggregated: row.try_get("rating_aggregated")?,
            },
            popularity: row.try_get("popularity")?,
        },
        hidden: row.try_get("hidden")?,
        nsfw: row.try_get("nsfw")?,
        layers: MetadataLayers {
            overrides: overrides.0,
            metadata: metadata.0,
            store: store.0,
        },
        metadata_fetched_at: row.try_get("metadata_fetched_at")?,
        metadata_checked_at: row.try_get("metadata_checked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Binds every column of [`WRITE_COLUMNS`] in order.
fn bind_game<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    game: &'q Game,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    q.bind(&game.canonical_title)
        .bind(&game.match_key)
        .bind(game.igdb_id)
        .bind(game.fields.description.as_deref())
        .bind(Json(&game.fields.developers))
        .bind(Json(&game.fields.genres))
        .bind(game.fields.release_date)
        .bind(game.fields.cover_image_url.as_deref())
        .bind(game.fields.ratings.community)
        .bind(game.fields.ratings.critic)
        .bind(game.fields.ratings.aggregated)
        .bind(game.fields.popularity)
        .bind(game.hidden)
        .bind(game.nsfw)
        .bind(Json(&game.layers.overrides))
        .bind(Json(&game.layers.metadata))
        .bind(Json(&game.layers.store))
        .bind(game.metadata_fetched_at)
        .bind(game.metadata_checked_at)
        .bind(game.created_at)
        .bind(game.updated_at)
}

/// Insert a new canonical game; `game.id` is ignored. Returns the new id.
pub async fn insert(conn: &mut SqliteConnection, game: &Game) -> sqlx::Result<i64> {
    let sql = format!(
        "INSERT INTO games ({WRITE_COLUMNS}) VALUES ({}) RETURNING id",
        ["?"; 21].join(", ")
    );
    let row = bind_game(sqlx::query(&sql), game).fetch_one(&mut *conn).await?;
    row.try_get("id")
}

pub async fn update(conn: &mut SqliteConnection, game: &Game) -> sqlx::Result<()> {
    let assignments = WRITE_COLUMNS
        .split(',')
        .map(|c| format!("{} = ?", c.trim()))
        .join(", ");
    let sql = format!("UPDATE games SET {assignments} WHERE id = ?");
    bind_game(sqlx::query(&sql), game)
        .bind(game.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get<'e, E: SqliteExecutor<'e>>(ex: E, id: i64) -> sqlx::Result<Option<Game>> {
    sqlx::query("SELECT * FROM games WHERE id = ?")
        .bind(id)
        .fetch_optional(ex)
        .await?
        .map(|row| game_from_row(&row))
        .transpose()
}

pub async fn list<'e, E: SqliteExecutor<'e>>(ex: E) -> sqlx::Result<Vec<Game>> {
    sqlx::query("SELECT * FROM games ORDER BY id")
        .fetch_all(ex)
        .await?
        .iter()
        .map(game_from_row)
        .collect()
}

pub async fn find_by_igdb<'e, E: SqliteExecutor<'e>>(ex: E, igdb_id: i64) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM games WHERE igdb_id = ?")
        .bind(igdb_id)
        .fetch_optional(ex)
        .await
}

/// Remember another title key for a game. Returns whether it was new.
pub async fn insert_alias(conn: &mut SqliteConnection, game_id: i64, alias_key: &str) -> sqlx::Result<bool> {
    if alias_key.trim().is_empty() {
        return Ok(false);
    }
    let res = sqlx::query(
        "INSERT OR IGNORE INTO game_aliases (alias_key, game_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(alias_key)
    .bind(game_id)
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn aliases<'e, E: SqliteExecutor<'e>>(ex: E, game_id: i64) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar("SELECT alias_key FROM game_aliases WHERE game_id = ? ORDER BY alias_key")
        .bind(game_id)
        .fetch_all(ex)
        .await
}

/// Snapshot of everything identity resolution reads, taken inside one read transaction.
#[instrument(skip(db))]
pub async fn load_index(db: &Db) -> sqlx::Result<LibraryIndex> {
    let mut tx = db.pool.begin().await?;
    let mut index = LibraryIndex::new(generation(&mut *tx).await?);

    for row in sqlx::query("SELECT id, igdb_id, match_key FROM games")
        .fetch_all(&mut *tx)
        .await?
    {
        index.add_game(row.try_get("id")?, row.try_get("igdb_id")?, row.try_get("match_key")?);
    }
    for row in sqlx::query("SELECT game_id, alias_key FROM game_aliases")
        .fetch_all(&mut *tx)
        .await?
    {
        index.add_alias(row.try_get("game_id")?, row.try_get("alias_key")?);
    }
    for own in ownership::list_all(&mut *tx).await? {
        index.add_ownership(own.game_id, own.store, own.store_game_id.as_deref());
    }
    tx.commit().await?;
    Ok(index)
}

/// Persist `updated` (a modified copy of `previous`), keeping identity
/// bookkeeping in step: a changed match key leaves the old key as an alias, and
/// an IGDB id already held by another game merges the two into the older one.
///
/// Games owned on one store under two different store ids are distinct
/// products (editions sharing an IGDB entry); they are never merged, and the
/// newer claim on the IGDB id is dropped instead.
pub async fn save_with_identity(
    conn: &mut SqliteConnection,
    mut updated: Game,
    previous: &Game,
) -> sqlx::Result<Game> {
    let mut structural = false;
    if updated.match_key != previous.match_key {
        insert_alias(&mut *conn, updated.id, &previous.match_key).await?;
        structural = true;
    }
    if let Some(igdb_id) = updated.igdb_id.filter(|_| updated.igdb_id != previous.igdb_id) {
        let holder = find_by_igdb(&mut *conn, igdb_id)
            .await?
            .filter(|id| *id != updated.id);
        let distinct = match holder {
            Some(holder) => ownership::store_ids_conflict(&mut *conn, holder, updated.id).await?,
            None => false,
        };
        match holder {
            Some(holder) if distinct => {
                warn!(
                    target = "ledger",
                    game_id = updated.id,
                    holder,
                    igdb_id,
                    "IGDB id already held by a distinct product on the same store; not merging"
                );
                updated.igdb_id = previous.igdb_id;
            }
            Some(holder) => {
                let other = get(&mut *conn, holder).await?.ok_or(sqlx::Error::RowNotFound)?;
                let (keep, absorb) = if other.id < updated.id {
                    (other, updated)
                } else {
                    (updated, other)
                };
                return merge(conn, keep, absorb).await;
            }
            None => structural = true,
        }
    }
    update(&mut *conn, &updated).await?;
    if structural {
        bump_generation(&mut *conn).await?;
    }
    Ok(updated)
}

/// Fold `absorb` into `keep`: ownership, aliases and collection membership move
/// over, override and metadata layers fill `keep`'s gaps, then `absorb` is deleted.
pub async fn merge(conn: &mut SqliteConnection, keep: Game, absorb: Game) -> sqlx::Result<Game> {
    ownership::reassign(&mut *conn, absorb.id, keep.id).await?;

    sqlx::query(
        "INSERT OR IGNORE INTO game_aliases (alias_key, game_id, created_at)
         SELECT alias_key, ?, created_at FROM game_aliases WHERE game_id = ?",
    )
    .bind(keep.id)
    .bind(absorb.id)
    .execute(&mut *conn)
    .await?;
    insert_alias(&mut *conn, keep.id, &absorb.match_key).await?;

    // Collection membership: adopt the absorbed slot unless `keep` is already a member.
    sqlx::query(
        "UPDATE OR IGNORE collection_games SET game_id = ? WHERE game_id = ?",
    )
    .bind(keep.id)
    .bind(absorb.id)
    .execute(&mut *conn)
    .await?;

    let mut merged = keep;
    let igdb_id = merged.igdb_id.or(absorb.igdb_id);
    fill_override(&mut merged.layers.overrides, &absorb.layers.overrides);
    merged.layers.metadata.fill_missing_from(&absorb.layers.metadata);
    merged.layers.store.fill_missing_from(&absorb.layers.store);
    merged.nsfw = resolve_nsfw(&merged, absorb.nsfw);
    merged.metadata_fetched_at = merged.metadata_fetched_at.max(absorb.metadata_fetched_at);
    merged.metadata_checked_at = merged.metadata_checked_at.max(absorb.metadata_checked_at);
    merged.created_at = merged.created_at.min(absorb.created_at);

    // Frees the absorbed IGDB id before `keep` takes it; remaining rows cascade.
    sqlx::query("DELETE FROM games WHERE id = ?")
        .bind(absorb.id)
        .execute(&mut *conn)
        .await?;

    merged.igdb_id = igdb_id;
    refresh_resolved(&mut merged);
    update(&mut *conn, &merged).await?;
    bump_generation(&mut *conn).await?;
    info!(
        target = "ledger",
        kept = merged.id,
        absorbed = absorb.id,
        igdb_id = ?merged.igdb_id,
        "merged duplicate games sharing an IGDB id"
    );
    Ok(merged)
}

fn fill_override(target: &mut GameOverride, other: &GameOverride) {
    if target.name.is_none() {
        target.name.clone_from(&other.name);
    }
    if target.igdb_id.is_none() {
        target.igdb_id = other.igdb_id;
    }
    if target.description.is_none() {
        target.description.clone_from(&other.description);
    }
    if target.developers.is_none() {
        target.developers.clone_from(&other.developers);
    }
    if target.genres.is_none() {
        target.genres.clone_from(&other.genres);
    }
    if target.release_date.is_none() {
        target.release_date.clone_from(&other.release_date);
    }
    if target.cover_image.is_none() {
        target.cover_image.clone_from(&other.cover_image);
    }
    if target.nsfw.is_none() {
        target.nsfw = other.nsfw;
    }
}

/// User edit: merge `ov` into the game's override layer.
#[instrument(skip(db, ov))]
pub async fn set_override(db: &Db, game_id: i64, ov: &GameOverride) -> LibraryResult<Game> {
    let mut tx = db.pool.begin().await?;
    let previous = get(&mut *tx, game_id)
        .await?
        .ok_or_else(|| LibraryError::not_found("game", game_id))?;
    let updated = apply_override(previous.clone(), ov);
    let saved = save_with_identity(&mut tx, updated, &previous).await?;
    tx.commit().await?;
    info!(target = "ledger", game_id, saved_as = saved.id, "override applied");
    Ok(saved)
}

#[instrument(skip(db))]
pub async fn set_hidden(db: &Db, game_id: i64, hidden: bool) -> LibraryResult<()> {
    let res = sqlx::query("UPDATE games SET hidden = ?, updated_at = ? WHERE id = ?")
        .bind(hidden)
        .bind(chrono::Utc::now())
        .bind(game_id)
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(LibraryError::not_found("game", game_id));
    }
    Ok(())
}

fn require_ids(game_ids: &[i64]) -> LibraryResult<Vec<i64>> {
    if game_ids.is_empty() {
        return Err(LibraryError::invalid_input("game_ids must not be empty"));
    }
    Ok(game_ids.iter().copied().unique().collect())
}

/// Hide or unhide several games at once; returns how many existed.
#[instrument(skip(db))]
pub async fn set_hidden_many(db: &Db, game_ids: &[i64], hidden: bool) -> LibraryResult<u64> {
    let ids = require_ids(game_ids)?;
    let now = chrono::Utc::now();
    let mut tx = db.pool.begin().await?;
    let mut updated = 0;
    for id in ids {
        updated += sqlx::query("UPDATE games SET hidden = ?, updated_at = ? WHERE id = ?")
            .bind(hidden)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    info!(target = "ledger", updated, hidden, "bulk hidden flag set");
    Ok(updated)
}

/// User NSFW verdict for one game, kept in the override layer.
pub async fn set_nsfw(db: &Db, game_id: i64, nsfw: bool) -> LibraryResult<Game> {
    set_override(db, game_id, &nsfw_override(nsfw)).await
}

/// NSFW verdict for several games at once; returns how many existed.
#[instrument(skip(db))]
pub async fn set_nsfw_many(db: &Db, game_ids: &[i64], nsfw: bool) -> LibraryResult<u64> {
    let ids = require_ids(game_ids)?;
    let ov = nsfw_override(nsfw);
    let mut tx = db.pool.begin().await?;
    let mut updated = 0;
    for id in ids {
        let Some(game) = get(&mut *tx, id).await? else {
            continue;
        };
        update(&mut *tx, &apply_override(game, &ov)).await?;
        updated += 1;
    }
    tx.commit().await?;
    info!(target = "ledger", updated, nsfw, "bulk nsfw flag set");
    Ok(updated)
}

fn nsfw_override(nsfw: bool) -> GameOverride {
    GameOverride {
        nsfw: Some(nsfw),
        ..GameOverride::default()
    }
}

/// Unlink a game from its IGDB entry and drop the fetched metadata layer.
#[instrument(skip(db))]
pub async fn clear_igdb(db: &Db, game_id: i64) -> LibraryResult<Game> {
    let mut tx = db.pool.begin().await?;
    let previous = get(&mut *tx, game_id)
        .await?
        .ok_or_else(|| LibraryError::not_found("game", game_id))?;
    let cleared = layers::clear_igdb(previous.clone());
    update(&mut *tx, &cleared).await?;
    if previous.igdb_id.is_some() {
        bump_generation(&mut *tx).await?;
    }
    tx.commit().await?;
    info!(target = "ledger", game_id, previous = ?previous.igdb_id, "igdb link cleared");
    Ok(cleared)
}

/// Every game joined with its ownership rows and collection membership.
/// Games without ownership (transient during matching) are left out.
pub async fn load_library(db: &Db) -> sqlx::Result<Vec<LibraryEntry>> {
    let mut tx = db.pool.begin().await?;
    let games = list(&mut *tx).await?;
    let mut owned = ownership::list_all(&mut *tx)
        .await?
        .into_iter()
        .into_group_map_by(|o| o.game_id);
    let mut memberships: HashMap<i64, Vec<i64>> = sqlx::query(
        "SELECT game_id, collection_id FROM collection_games ORDER BY collection_id",
    )
    .fetch_all(&mut *tx)
    .await?
    .iter()
    .map(|r| Ok((r.try_get::<i64, _>("game_id")?, r.try_get::<i64, _>("collection_id")?)))
    .collect::<sqlx::Result<Vec<_>>>()?
    .into_iter()
    .into_group_map();
    tx.commit().await?;

    Ok(games
        .into_iter()
        .filter_map(|game| {
            let ownership = owned.remove(&game.id)?;
            let collections = memberships.remove(&game.id).unwrap_or_default();
            Some(LibraryEntry {
                game,
                ownership,
                collections,
            })
        })
        .collect())
}

pub async fn load_entry(db: &Db, game_id: i64) -> LibraryResult<LibraryEntry> {
    let game = get(&db.pool, game_id)
        .await?
        .ok_or_else(|| LibraryError::not_found("game", game_id))?;
    let ownership = ownership::list_for_game(&db.pool, game_id).await?;
    let collections = sqlx::query_scalar(
        "SELECT collection_id FROM collection_games WHERE game_id = ? ORDER BY collection_id",
    )
    .bind(game_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(LibraryEntry {
        game,
        ownership,
        collections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawOwnershipRecord, StoreId};
    use chrono::Utc;

    async fn seed(db: &Db, title: &str, store: StoreId, store_id: &str) -> Game {
        let mut conn = db.pool.acquire().await.unwrap();
        let mut game = Game::new(0, title, crate::normalization::title::normalize_title(title));
        game.id = insert(&mut conn, &game).await.unwrap();
        let rec = RawOwnershipRecord::new(store, title)
            .with_store_game_id(store_id)
            .with_playtime(60);
        ownership::upsert(&mut conn, game.id, &rec, Utc::now()).await.unwrap();
        game
    }

    #[tokio::test]
    async fn game_round_trips_through_row() {
        let db = Db::connect_memory().await.unwrap();
        let mut game = seed(&db, "Hades", StoreId::Steam, "1145360").await;
        game.fields.genres.insert("Roguelike".into());
        game.layers.overrides.description = Some("manual".into());
        game.fields.ratings.critic = Some(93.0);
        {
            let mut conn = db.pool.acquire().await.unwrap();
            update(&mut conn, &game).await.unwrap();
        }
        let loaded = get(&db.pool, game.id).await.unwrap().unwrap();
        assert_eq!(loaded.fields.genres, game.fields.genres);
        assert_eq!(loaded.layers.overrides.description.as_deref(), Some("manual"));
        assert_eq!(loaded.fields.ratings.critic, Some(93.0));
    }

    #[tokio::test]
    async fn igdb_collision_merges_into_older_game() {
        let db = Db::connect_memory().await.unwrap();
        let older = seed(&db, "Team Fortress 2", StoreId::Steam, "440").await;
        let newer = seed(&db, "TF2", StoreId::Local, "abc").await;

        let mut tx = db.pool.begin().await.unwrap();
        let mut claimed = older.clone();
        claimed.igdb_id = Some(1234);
        save_with_identity(&mut tx, claimed, &older).await.unwrap();
        let mut colliding = newer.clone();
        colliding.igdb_id = Some(1234);
        let merged = save_with_identity(&mut tx, colliding, &newer).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(merged.id, older.id);
        assert!(get(&db.pool, newer.id).await.unwrap().is_none());
        let owned = ownership::list_for_game(&db.pool, older.id).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert_eq!(aliases(&db.pool, older.id).await.unwrap(), vec!["tf2".to_string()]);

        let index = load_index(&db).await.unwrap();
        assert_eq!(index.game_for_store_id(StoreId::Local, "abc"), Some(older.id));
        assert_eq!(index.game_for_igdb(1234), Some(older.id));
    }

    #[tokio::test]
    async fn rename_override_keeps_old_key_as_alias() {
        let db = Db::connect_memory().await.unwrap();
        let game = seed(&db, "doom_2016_local", StoreId::Local, "f00").await;
        let before = generation(&db.pool).await.unwrap();
        let saved = set_override(
            &db,
            game.id,
            &GameOverride {
                name: Some("DOOM (2016)".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.canonical_title, "DOOM (2016)");
        assert_eq!(aliases(&db.pool, game.id).await.unwrap(), vec!["doom 2016 local".to_string()]);
        assert!(generation(&db.pool).await.unwrap() > before);
    }

    #[tokio::test]
    async fn hidden_games_stay_in_library_load() {
        let db = Db::connect_memory().await.unwrap();
        let game = seed(&db, "Celeste", StoreId::Epic, "salt").await;
        set_hidden(&db, game.id, true).await.unwrap();
        let lib = load_library(&db).await.unwrap();
        assert!(lib[0].game.hidden);
        assert!(matches!(
            set_hidden(&db, 999, true).await,
            Err(LibraryError::NotFound { entity: "game", .. })
        ));
    }

    #[tokio::test]
    async fn igdb_collision_between_distinct_store_products_does_not_merge() {
        let db = Db::connect_memory().await.unwrap();
        let base = seed(&db, "The Elder Scrolls V: Skyrim", StoreId::Steam, "72850").await;
        let special = seed(&db, "The Elder Scrolls V: Skyrim Special Edition", StoreId::Steam, "489830").await;

        let mut tx = db.pool.begin().await.unwrap();
        let mut claimed = base.clone();
        claimed.igdb_id = Some(472);
        save_with_identity(&mut tx, claimed, &base).await.unwrap();
        let mut colliding = special.clone();
        colliding.igdb_id = Some(472);
        colliding.layers.metadata.description = Some("auto".into());
        let saved = save_with_identity(&mut tx, colliding, &special).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(saved.id, special.id);
        assert_eq!(saved.igdb_id, None);
        let stored = get(&db.pool, special.id).await.unwrap().unwrap();
        assert_eq!(stored.layers.metadata.description.as_deref(), Some("auto"));
        let index = load_index(&db).await.unwrap();
        assert_eq!(index.game_for_igdb(472), Some(base.id));
        assert_eq!(index.game_for_store_id(StoreId::Steam, "489830"), Some(special.id));
        assert_eq!(index.game_for_store_id(StoreId::Steam, "72850"), Some(base.id));
    }

    #[tokio::test]
    async fn bulk_flags_count_existing_games_and_reject_empty_lists() {
        let db = Db::connect_memory().await.unwrap();
        let celeste = seed(&db, "Celeste", StoreId::Epic, "salt").await;
        let hades = seed(&db, "Hades", StoreId::Steam, "1145360").await;

        assert_eq!(set_hidden_many(&db, &[celeste.id, hades.id, celeste.id, 999], true).await.unwrap(), 2);
        assert_eq!(set_nsfw_many(&db, &[hades.id, 999], true).await.unwrap(), 1);
        assert!(matches!(set_hidden_many(&db, &[], true).await, Err(LibraryError::InvalidInput(_))));
        assert!(matches!(set_nsfw_many(&db, &[], false).await, Err(LibraryError::InvalidInput(_))));

        let lib = load_library(&db).await.unwrap();
        assert!(lib.iter().all(|e| e.game.hidden));
        let hades = get(&db.pool, hades.id).await.unwrap().unwrap();
        assert!(hades.nsfw);
        assert_eq!(hades.layers.overrides.nsfw, Some(true));
        assert!(!get(&db.pool, celeste.id).await.unwrap().unwrap().nsfw);

        let unflagged = set_nsfw(&db, hades.id, false).await.unwrap();
        assert!(!unflagged.nsfw);
        assert!(matches!(set_nsfw(&db, 999, true).await, Err(LibraryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn clearing_igdb_unlinks_and_drops_fetched_metadata() {
        let db = Db::connect_memory().await.unwrap();
        let game = seed(&db, "DOOM", StoreId::Steam, "379720").await;
        let mut linked = set_override(
            &db,
            game.id,
            &GameOverride {
                igdb_id: Some(7351),
                description: Some("manual".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        linked.layers.metadata.cover_image_url = Some("https://images.igdb.com/t_cover_big/7351.jpg".into());
        refresh_resolved(&mut linked);
        {
            let mut conn = db.pool.acquire().await.unwrap();
            update(&mut conn, &linked).await.unwrap();
        }
        let before = generation(&db.pool).await.unwrap();

        let cleared = clear_igdb(&db, game.id).await.unwrap();
        assert_eq!(cleared.igdb_id, None);
        assert_eq!(cleared.layers.overrides.igdb_id, None);
        assert!(cleared.fields.cover_image_url.is_none());
        assert_eq!(cleared.fields.description.as_deref(), Some("manual"));
        assert!(cleared.metadata_checked_at.is_some());
        assert!(generation(&db.pool).await.unwrap() > before);
        assert_eq!(load_index(&db).await.unwrap().game_for_igdb(7351), None);

        assert!(matches!(clear_igdb(&db, 999).await, Err(LibraryError::NotFound { .. })));
    }
}
