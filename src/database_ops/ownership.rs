//! Ownership Ledger: one row per (game, store), updated in place across syncs.
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use tracing::{debug, info, instrument};

use crate::database_ops::db::{bump_generation, Db};
use crate::error::{LibraryError, LibraryResult};
use crate::model::{Ownership, RawOwnershipRecord, StoreId};

const COLUMNS: &str = "game_id, store, store_game_id, playtime_minutes, last_played, store_url, \
                       extra, first_seen_at, last_synced_at";

pub(crate) fn ownership_from_row(row: &SqliteRow) -> sqlx::Result<Ownership> {
    let store: String = row.try_get("store")?;
    let store = store
        .parse::<StoreId>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    let extra: Json<Map<String, Value>> = row.try_get("extra")?;
    Ok(Ownership {
        game_id: row.try_get("game_id")?,
        store,
        store_game_id: row.try_get("store_game_id")?,
        playtime_minutes: row.try_get("playtime_minutes")?,
        last_played: row.try_get("last_played")?,
        store_url: row.try_get("store_url")?,
        extra: extra.0,
        first_seen_at: row.try_get("first_seen_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

/// Result of one ledger write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub ownership: Ownership,
    pub inserted: bool,
    /// The row's store id was recorded by this write (new row, or first id for an old one).
    pub store_id_recorded: bool,
}

/// Insert or update the (game, store) row from a raw record.
///
/// Existing rows keep their store id once set and keep any value the record
/// leaves null; `last_synced_at` always moves forward. Absent titles are never
/// deleted here.
pub async fn upsert(
    conn: &mut SqliteConnection,
    game_id: i64,
    record: &RawOwnershipRecord,
    now: DateTime<Utc>,
) -> sqlx::Result<UpsertOutcome> {
    let previous = get(&mut *conn, game_id, record.store).await?;
    let store_game_id = record.store_game_id.as_deref().filter(|id| !id.is_empty());

    let row = sqlx::query(&format!(
        "INSERT INTO ownership ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(game_id, store) DO UPDATE SET
             store_game_id    = COALESCE(ownership.store_game_id, excluded.store_game_id),
             playtime_minutes = COALESCE(excluded.playtime_minutes, ownership.playtime_minutes),
             last_played      = COALESCE(excluded.last_played, ownership.last_played),
             store_url        = COALESCE(excluded.store_url, ownership.store_url),
             extra            = CASE WHEN excluded.extra = '{{}}' THEN ownership.extra ELSE excluded.extra END,
             last_synced_at   = excluded.last_synced_at
         RETURNING {COLUMNS}"
    ))
    .bind(game_id)
    .bind(record.store.as_str())
    .bind(store_game_id)
    .bind(record.playtime_minutes)
    .bind(record.last_played)
    .bind(record.store_url.as_deref())
    .bind(Json(&record.extra))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    let ownership = ownership_from_row(&row)?;

    let store_id_recorded = ownership.store_game_id.is_some()
        && previous
            .as_ref()
            .map_or(true, |p| p.store_game_id.is_none());
    debug!(
        target = "ledger",
        game_id,
        store = %record.store,
        inserted = previous.is_none(),
        playtime = ?ownership.playtime_minutes,
        "ownership upserted"
    );
    Ok(UpsertOutcome {
        ownership,
        inserted: previous.is_none(),
        store_id_recorded,
    })
}

pub async fn get<'e, E: SqliteExecutor<'e>>(
    ex: E,
    game_id: i64,
    store: StoreId,
) -> sqlx::Result<Option<Ownership>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM ownership WHERE game_id = ? AND store = ?"
    ))
    .bind(game_id)
    .bind(store.as_str())
    .fetch_optional(ex)
    .await?
    .map(|row| ownership_from_row(&row))
    .transpose()
}

pub async fn list_for_game<'e, E: SqliteExecutor<'e>>(
    ex: E,
    game_id: i64,
) -> sqlx::Result<Vec<Ownership>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM ownership WHERE game_id = ? ORDER BY store"
    ))
    .bind(game_id)
    .fetch_all(ex)
    .await?
    .iter()
    .map(ownership_from_row)
    .collect()
}

pub async fn list_all<'e, E: SqliteExecutor<'e>>(ex: E) -> sqlx::Result<Vec<Ownership>> {
    sqlx::query(&format!(
        "SELECT {COLUMNS} FROM ownership ORDER BY game_id, store"
    ))
    .fetch_all(ex)
    .await?
    .iter()
    .map(ownership_from_row)
    .collect()
}

/// Move every ownership row of `from` onto `into`. Where both games are owned
/// on the same store the rows are folded together: the surviving row keeps its
/// store id (or adopts the other's), the larger playtime and the latest play.
pub(crate) async fn reassign(
    conn: &mut SqliteConnection,
    from: i64,
    into: i64,
) -> sqlx::Result<()> {
    for row in list_for_game(&mut *conn, from).await? {
        let Some(existing) = get(&mut *conn, into, row.store).await? else {
            sqlx::query("UPDATE ownership SET game_id = ? WHERE game_id = ? AND store = ?")
                .bind(into)
                .bind(from)
                .bind(row.store.as_str())
                .execute(&mut *conn)
                .await?;
            continue;
        };
        sqlx::query("DELETE FROM ownership WHERE game_id = ? AND store = ?")
            .bind(from)
            .bind(row.store.as_str())
            .execute(&mut *conn)
            .await?;
        let playtime = match (existing.playtime_minutes, row.playtime_minutes) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        sqlx::query(
            "UPDATE ownership SET
                 store_game_id    = COALESCE(store_game_id, ?),
                 playtime_minutes = ?,
                 last_played      = ?,
                 store_url        = COALESCE(store_url, ?),
                 first_seen_at    = ?,
                 last_synced_at   = ?
             WHERE game_id = ? AND store = ?",
        )
        .bind(row.store_game_id.as_deref())
        .bind(playtime)
        .bind(existing.last_played.max(row.last_played))
        .bind(row.store_url.as_deref())
        .bind(existing.first_seen_at.min(row.first_seen_at))
        .bind(existing.last_synced_at.max(row.last_synced_at))
        .bind(into)
        .bind(row.store.as_str())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Whether games `a` and `b` are owned on some store under two different store
/// ids, i.e. they are separate products there and must not be folded together.
pub(crate) async fn store_ids_conflict(
    conn: &mut SqliteConnection,
    a: i64,
    b: i64,
) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM ownership x JOIN ownership y ON x.store = y.store
             WHERE x.game_id = ? AND y.game_id = ?
               AND x.store_game_id IS NOT NULL AND y.store_game_id IS NOT NULL
               AND x.store_game_id <> y.store_game_id)",
    )
    .bind(a)
    .bind(b)
    .fetch_one(&mut *conn)
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RemoveOutcome {
    pub game_id: i64,
    pub store: StoreId,
    /// The game had no other store left and was deleted with it.
    pub game_deleted: bool,
}

/// Explicit user removal of one ownership row. Removing the last store a game
/// is owned on removes the game too, so no ownerless game stays in the library.
#[instrument(skip(db))]
pub async fn remove(db: &Db, game_id: i64, store: StoreId) -> LibraryResult<RemoveOutcome> {
    let mut tx = db.pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM ownership WHERE game_id = ? AND store = ?")
        .bind(game_id)
        .bind(store.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(LibraryError::not_found("ownership", format!("{game_id}/{store}")));
    }
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ownership WHERE game_id = ?")
        .bind(game_id)
        .fetch_one(&mut *tx)
        .await?;
    let game_deleted = remaining == 0;
    if game_deleted {
        sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(game_id)
            .execute(&mut *tx)
            .await?;
    }
    bump_generation(&mut *tx).await?;
    tx.commit().await?;
    info!(target = "ledger", game_id, store = %store, game_deleted, "ownership removed by user");
    Ok(RemoveOutcome {
        game_id,
        store,
        game_deleted,
    })
}
