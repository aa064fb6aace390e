//! Metadata enrichment pass over the persisted library.
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::db::Db;
use crate::database_ops::games;
use crate::error::{LibraryError, LibraryResult};
use crate::merge::{needs_enrichment, refresh_resolved, resolve_nsfw, EnrichMode, MetadataResolver, MetadataService};
use crate::model::Game;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichSummary {
    pub matched: usize,
    pub not_found: usize,
    /// Games that needed nothing (already complete in `Missing` mode).
    pub skipped: usize,
    pub failed: usize,
}

/// Enrich every eligible game, one at a time. In `Missing` mode only games
/// lacking a cover, rating or description are looked up, never-checked ones
/// first; `limit` (or the resolver's configured limit) caps the lookups.
#[instrument(skip(db, resolver, service))]
pub async fn enrich_library(
    db: &Db,
    resolver: &MetadataResolver,
    service: &dyn MetadataService,
    mode: EnrichMode,
    limit: Option<usize>,
) -> LibraryResult<EnrichSummary> {
    let mut summary = EnrichSummary::default();
    let mut candidates = Vec::new();
    for game in games::list(&db.pool).await? {
        if mode == EnrichMode::Missing && !needs_enrichment(&game) {
            summary.skipped += 1;
        } else {
            candidates.push(game);
        }
    }
    candidates.sort_by_key(|g| (g.metadata_checked_at, g.id));
    if let Some(limit) = limit.or(resolver.config().limit) {
        candidates.truncate(limit);
    }
    info!(target = "enrich", candidates = candidates.len(), ?mode, "starting enrichment pass");

    for game in candidates {
        let game_id = game.id;
        match enrich_one(db, resolver, service, game, mode).await {
            Ok(_) => summary.matched += 1,
            Err(LibraryError::MetadataNotFound { .. }) => summary.not_found += 1,
            Err(err) => {
                warn!(target = "enrich", game_id, error = %err, "enrichment failed");
                summary.failed += 1;
            }
        }
    }
    info!(
        target = "enrich",
        matched = summary.matched,
        not_found = summary.not_found,
        skipped = summary.skipped,
        failed = summary.failed,
        "enrichment pass finished"
    );
    Ok(summary)
}

/// Enrich a single game on demand, whatever its current completeness.
pub async fn enrich_game(
    db: &Db,
    resolver: &MetadataResolver,
    service: &dyn MetadataService,
    game_id: i64,
    mode: EnrichMode,
) -> LibraryResult<Game> {
    let game = games::get(&db.pool, game_id)
        .await?
        .ok_or_else(|| LibraryError::not_found("game", game_id))?;
    enrich_one(db, resolver, service, game, mode).await
}

async fn enrich_one(
    db: &Db,
    resolver: &MetadataResolver,
    service: &dyn MetadataService,
    game: Game,
    mode: EnrichMode,
) -> LibraryResult<Game> {
    let game_id = game.id;
    match resolver.enrich(game, service, mode).await {
        Ok(enriched) => persist(db, enriched).await,
        Err(err @ LibraryError::MetadataNotFound { .. }) => {
            debug!(target = "enrich", game_id, "no confident metadata match");
            sqlx::query("UPDATE games SET metadata_checked_at = ? WHERE id = ?")
                .bind(chrono::Utc::now())
                .bind(game_id)
                .execute(&db.pool)
                .await?;
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Write the looked-up metadata onto the current row. Only the metadata layer
/// and IGDB bookkeeping are taken from the lookup, so store fields written by
/// a sync in the meantime are kept.
async fn persist(db: &Db, enriched: Game) -> LibraryResult<Game> {
    let mut tx = db.pool.begin().await?;
    let current = games::get(&mut *tx, enriched.id)
        .await?
        .ok_or_else(|| LibraryError::not_found("game", enriched.id))?;

    let mut updated = current.clone();
    updated.igdb_id = current.igdb_id.or(enriched.igdb_id);
    updated.layers.metadata = enriched.layers.metadata;
    updated.nsfw = resolve_nsfw(&updated, enriched.nsfw);
    updated.metadata_fetched_at = enriched.metadata_fetched_at;
    updated.metadata_checked_at = enriched.metadata_checked_at;
    refresh_resolved(&mut updated);

    let saved = games::save_with_identity(&mut tx, updated, &current).await?;
    tx.commit().await?;
    if saved.id != current.id {
        info!(target = "enrich", absorbed = current.id, into = saved.id, igdb_id = ?saved.igdb_id, "merged duplicate game by igdb id");
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::import::import_batch;
    use crate::database_ops::worker_manager::SyncContext;
    use crate::matching::IdentityMatcher;
    use crate::model::{GameOverride, MetadataCandidate, MetadataRecord, RawOwnershipRecord, Ratings, StoreId};
    use crate::normalization::title::normalize_title;
    use async_trait::async_trait;

    struct Catalog(Vec<MetadataRecord>);

    #[async_trait]
    impl MetadataService for Catalog {
        async fn search_by_title(&self, title: &str) -> anyhow::Result<Vec<MetadataCandidate>> {
            Ok(self
                .0
                .iter()
                .filter(|r| normalize_title(&r.title) == title)
                .map(|r| MetadataCandidate {
                    id: r.id,
                    title: r.title.clone(),
                    release_year: None,
                })
                .collect())
        }

        async fn fetch_by_id(&self, id: i64) -> anyhow::Result<Option<MetadataRecord>> {
            Ok(self.0.iter().find(|r| r.id == id).cloned())
        }
    }

    fn entry(id: i64, title: &str) -> MetadataRecord {
        MetadataRecord {
            id,
            title: title.into(),
            summary: Some("auto".into()),
            cover_url: Some(format!("https://images.igdb.com/t_cover_big/{id}.jpg")),
            ratings: Ratings {
                aggregated: Some(88.0),
                ..Ratings::default()
            },
            ..MetadataRecord::default()
        }
    }

    async fn seed(db: &Db, records: Vec<RawOwnershipRecord>) {
        let mut ctx = SyncContext::new(None);
        let summary = import_batch(db, &IdentityMatcher::default(), &mut ctx, records).await;
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn manual_description_survives_enrichment_passes() {
        let db = Db::connect_memory().await.unwrap();
        seed(
            &db,
            vec![RawOwnershipRecord::new(StoreId::Local, "DOOM")
                .with_store_game_id("a1")
                .with_overrides(GameOverride {
                    description: Some("manual".into()),
                    ..Default::default()
                })],
        )
        .await;
        let catalog = Catalog(vec![entry(7351, "DOOM")]);
        let resolver = MetadataResolver::default();

        let first = enrich_library(&db, &resolver, &catalog, EnrichMode::Missing, None).await.unwrap();
        assert_eq!(first.matched, 1);
        let second = enrich_library(&db, &resolver, &catalog, EnrichMode::All, None).await.unwrap();
        assert_eq!(second.matched, 1);

        let game = &games::list(&db.pool).await.unwrap()[0];
        assert_eq!(game.fields.description.as_deref(), Some("manual"));
        assert_eq!(game.layers.metadata.description.as_deref(), Some("auto"));
        assert_eq!(game.igdb_id, Some(7351));

        // Complete now, so an automatic pass leaves it alone.
        let third = enrich_library(&db, &resolver, &catalog, EnrichMode::Missing, None).await.unwrap();
        assert_eq!(third, EnrichSummary { skipped: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn unmatched_game_is_marked_checked_and_left_empty() {
        let db = Db::connect_memory().await.unwrap();
        seed(&db, vec![RawOwnershipRecord::new(StoreId::Itch, "Obscure Jam Game")]).await;
        let summary = enrich_library(&db, &MetadataResolver::default(), &Catalog(vec![]), EnrichMode::Missing, None)
            .await
            .unwrap();
        assert_eq!(summary.not_found, 1);
        let game = &games::list(&db.pool).await.unwrap()[0];
        assert!(game.igdb_id.is_none());
        assert!(game.fields.description.is_none());
        assert!(game.metadata_checked_at.is_some());
    }

    #[tokio::test]
    async fn shared_igdb_id_merges_into_older_game() {
        let db = Db::connect_memory().await.unwrap();
        seed(
            &db,
            vec![
                RawOwnershipRecord::new(StoreId::Local, "doom_install")
                    .with_store_game_id("a1")
                    .with_overrides(GameOverride {
                        igdb_id: Some(7351),
                        ..Default::default()
                    }),
                RawOwnershipRecord::new(StoreId::Steam, "DOOM").with_store_game_id("379720"),
            ],
        )
        .await;
        assert_eq!(games::list(&db.pool).await.unwrap().len(), 2);

        let catalog = Catalog(vec![entry(7351, "DOOM")]);
        let resolver = MetadataResolver::default();
        enrich_library(&db, &resolver, &catalog, EnrichMode::Missing, None).await.unwrap();

        let all = games::list(&db.pool).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].igdb_id, Some(7351));
        let entry = games::load_entry(&db, all[0].id).await.unwrap();
        assert_eq!(entry.ownership.len(), 2);
    }

    #[tokio::test]
    async fn editions_sharing_an_igdb_id_stay_separate_across_resyncs() {
        let db = Db::connect_memory().await.unwrap();
        let library = || {
            vec![
                RawOwnershipRecord::new(StoreId::Steam, "The Elder Scrolls V: Skyrim").with_store_game_id("72850"),
                RawOwnershipRecord::new(StoreId::Steam, "The Elder Scrolls V: Skyrim Special Edition")
                    .with_store_game_id("489830"),
            ]
        };
        let catalog = Catalog(vec![entry(472, "The Elder Scrolls V: Skyrim")]);
        let resolver = MetadataResolver::default();
        let matcher = IdentityMatcher::default();

        for round in 0..3 {
            let mut ctx = SyncContext::new(None);
            let summary = import_batch(&db, &matcher, &mut ctx, library()).await;
            assert_eq!(summary.failed, 0);
            if round == 0 {
                assert_eq!(summary.created, 2);
            } else {
                assert_eq!(summary.created, 0, "round {round} recreated a game");
                assert_eq!(summary.matched, 2);
            }
            enrich_library(&db, &resolver, &catalog, EnrichMode::Missing, None).await.unwrap();

            let all = games::list(&db.pool).await.unwrap();
            assert_eq!(all.len(), 2);
            assert_eq!(all.iter().filter(|g| g.igdb_id == Some(472)).count(), 1);
            let mut conn = db.pool.acquire().await.unwrap();
            let ids: Vec<_> = crate::database_ops::ownership::list_all(&mut *conn)
                .await
                .unwrap()
                .into_iter()
                .filter_map(|o| o.store_game_id)
                .collect();
            assert_eq!(ids.len(), 2);
            assert!(ids.contains(&"72850".to_string()) && ids.contains(&"489830".to_string()));
        }
    }

    #[tokio::test]
    async fn limit_caps_lookups() {
        let db = Db::connect_memory().await.unwrap();
        seed(
            &db,
            vec![
                RawOwnershipRecord::new(StoreId::Gog, "Celeste"),
                RawOwnershipRecord::new(StoreId::Gog, "Hades"),
                RawOwnershipRecord::new(StoreId::Gog, "Inside"),
            ],
        )
        .await;
        let summary = enrich_library(&db, &MetadataResolver::default(), &Catalog(vec![]), EnrichMode::Missing, Some(2))
            .await
            .unwrap();
        assert_eq!(summary.not_found, 2);
    }
}
