use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqliteExecutor};
use tracing::{info, instrument};

/// Numbered schema migrations, applied in order and recorded in `_library_migrations`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "library core",
        r#"
CREATE TABLE games (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_title     TEXT NOT NULL,
    match_key           TEXT NOT NULL,
    igdb_id             INTEGER UNIQUE,
    description         TEXT,
    developers          TEXT NOT NULL DEFAULT '[]',
    genres              TEXT NOT NULL DEFAULT '[]',
    release_date        TEXT,
    cover_image_url     TEXT,
    rating_community    REAL,
    rating_critic       REAL,
    rating_aggregated   REAL,
    popularity          REAL,
    hidden              INTEGER NOT NULL DEFAULT 0,
    nsfw                INTEGER NOT NULL DEFAULT 0,
    override_layer      TEXT NOT NULL DEFAULT '{}',
    metadata_layer      TEXT NOT NULL DEFAULT '{}',
    store_layer         TEXT NOT NULL DEFAULT '{}',
    metadata_fetched_at TEXT,
    metadata_checked_at TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX idx_games_match_key ON games(match_key);

CREATE TABLE ownership (
    game_id          INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    store            TEXT NOT NULL,
    store_game_id    TEXT,
    playtime_minutes INTEGER,
    last_played      TEXT,
    store_url        TEXT,
    extra            TEXT NOT NULL DEFAULT '{}',
    first_seen_at    TEXT NOT NULL,
    last_synced_at   TEXT NOT NULL,
    PRIMARY KEY (game_id, store)
);
CREATE UNIQUE INDEX idx_ownership_store_id
    ON ownership(store, store_game_id) WHERE store_game_id IS NOT NULL;

CREATE TABLE game_aliases (
    alias_key  TEXT NOT NULL,
    game_id    INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (alias_key, game_id)
);

CREATE TABLE library_meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT INTO library_meta(key, value) VALUES ('generation', 0);
"#,
    ),
    (
        2,
        "collections",
        r#"
CREATE TABLE collections (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL,
    description    TEXT,
    cover_strategy TEXT NOT NULL DEFAULT 'first_game',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE collection_games (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    game_id       INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    added_at      TEXT NOT NULL,
    PRIMARY KEY (collection_id, game_id)
);
CREATE INDEX idx_collection_games_game ON collection_games(game_id);
"#,
    ),
];

#[derive(Clone, Debug)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid sqlite database url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .context("failed to open library database")?;
        info!(max_connections, "connected to library db");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database for tests and dry runs. One connection, kept
    /// alive for the pool's lifetime, since the data dies with it.
    pub async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Apply every embedded migration not yet recorded.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _library_migrations (
                version      INTEGER PRIMARY KEY,
                description  TEXT NOT NULL,
                installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
             )",
        )
        .execute(&self.pool)
        .await?;

        let applied: Vec<i64> = sqlx::query("SELECT version FROM _library_migrations")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<i64, _>(0))
            .collect::<Result<_, _>>()?;

        for (version, description, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }
            info!(version, description, "applying migration");
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {version} ({description}) failed"))?;
            sqlx::query("INSERT INTO _library_migrations(version, description) VALUES (?, ?)")
                .bind(version)
                .bind(description)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        info!(
            version = MIGRATIONS.last().map(|m| m.0).unwrap_or_default(),
            "migrations up-to-date"
        );
        Ok(())
    }
}

/// Structural generation of the library. Bumped whenever a game, alias, IGDB
/// id or store id appears or disappears, so cached match indexes can tell they
/// went stale.
pub async fn generation<'e, E: SqliteExecutor<'e>>(ex: E) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT value FROM library_meta WHERE key = 'generation'")
        .fetch_one(ex)
        .await
}

pub async fn bump_generation<'e, E: SqliteExecutor<'e>>(ex: E) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "UPDATE library_meta SET value = value + 1 WHERE key = 'generation' RETURNING value",
    )
    .fetch_one(ex)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Db::connect_memory().await.unwrap();
        db.migrate().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _library_migrations")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
        assert!(db.ping().await);
    }

    #[tokio::test]
    async fn generation_bumps_monotonically() {
        let db = Db::connect_memory().await.unwrap();
        assert_eq!(generation(&db.pool).await.unwrap(), 0);
        assert_eq!(bump_generation(&db.pool).await.unwrap(), 1);
        assert_eq!(bump_generation(&db.pool).await.unwrap(), 2);
        assert_eq!(generation(&db.pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("lib.db").display());
        let db = Db::connect(&url, 2).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
