//! The atomic import unit: match one raw record and upsert its ownership in a
//! single transaction, plus the batch drivers built on it.
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::database_ops::db::{bump_generation, generation, Db};
use crate::database_ops::worker_manager::SyncContext;
use crate::database_ops::{games, ownership};
use crate::error::{LibraryError, LibraryResult};
use crate::matching::{CreateReason, IdentityMatcher, MatchDecision};
use crate::merge::{apply_override, apply_store_fields};
use crate::model::{Game, RawOwnershipRecord, StoreId};
use crate::normalization::record::RecordNormalizer;
use crate::normalization::title::normalize_title;

/// Attempts per record before a write conflict is reported.
pub const MAX_CONFLICT_RETRIES: u32 = 10;
const MAX_REPORTED_ERRORS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub processed: usize,
    pub created: usize,
    pub matched: usize,
    /// Rejected before matching (validation errors).
    pub skipped: usize,
    /// Created instead of guessing between near-tied candidates (also counted in `created`).
    pub ambiguous: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    pub fn absorb(&mut self, other: &ImportSummary) {
        self.processed += other.processed;
        self.created += other.created;
        self.matched += other.matched;
        self.skipped += other.skipped;
        self.ambiguous += other.ambiguous;
        self.failed += other.failed;
        for err in &other.errors {
            self.push_error(err.clone());
        }
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub game_id: i64,
    pub is_new: bool,
    pub ownership_inserted: bool,
    pub decision: MatchDecision,
}

enum Attempt {
    Done(ImportOutcome),
    /// The cached index predates another writer's structural change.
    Stale,
}

/// Resolve `record` to a canonical game and upsert its ownership row, atomically.
///
/// Concurrent writers are detected through the library generation and SQLite's
/// snapshot checks; the losing side reloads its index and retries against the
/// rows the winner created.
#[instrument(skip_all, fields(store = %record.store, title = %record.title))]
pub async fn import_record(
    db: &Db,
    matcher: &IdentityMatcher,
    ctx: &mut SyncContext,
    record: &RawOwnershipRecord,
) -> LibraryResult<ImportOutcome> {
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        match try_import(db, matcher, ctx, record).await {
            Ok(Attempt::Done(outcome)) => return Ok(outcome),
            Ok(Attempt::Stale) => {
                debug!(target = "sync", attempt, "library changed underneath; reloading index");
                ctx.invalidate_index();
            }
            Err(err) if err.is_retryable() => {
                debug!(target = "sync", attempt, error = %err, "write conflict; retrying");
                ctx.invalidate_index();
                let jitter = rand::thread_rng().gen_range(2..12u64);
                tokio::time::sleep(Duration::from_millis(jitter * u64::from(attempt))).await;
            }
            Err(err) => return Err(err),
        }
    }
    warn!(target = "sync", store = %record.store, title = %record.title, "giving up after repeated conflicts");
    Err(LibraryError::Conflict {
        attempts: MAX_CONFLICT_RETRIES,
    })
}

async fn try_import(
    db: &Db,
    matcher: &IdentityMatcher,
    ctx: &mut SyncContext,
    record: &RawOwnershipRecord,
) -> LibraryResult<Attempt> {
    let index = ctx.index(db).await?;
    let decision = matcher.resolve(record, index)?;
    let expected_generation = index.generation();
    let now = Utc::now();

    let mut tx = db.pool.begin().await?;
    if generation(&mut *tx).await? != expected_generation {
        return Ok(Attempt::Stale);
    }

    let mut structural = false;
    let game_id = match &decision {
        MatchDecision::Existing { game_id, .. } => *game_id,
        MatchDecision::Create {
            canonical_title,
            match_key,
            ..
        } => {
            structural = true;
            games::insert(&mut tx, &Game::new(0, canonical_title.as_str(), match_key.as_str())).await?
        }
    };
    let Some(previous) = games::get(&mut *tx, game_id).await? else {
        return Ok(Attempt::Stale);
    };

    let mut updated = apply_store_fields(previous.clone(), &record.native);
    if let Some(ov) = record.overrides.as_ref().filter(|o| !o.is_empty()) {
        updated = apply_override(updated, ov);
    }

    // Id-matched records teach the game the title this store uses for it.
    // Fuzzy matches never do, so a chain of near matches cannot drift.
    let reported_key = normalize_title(&record.title);
    let alias_added = decision.is_id_match()
        && reported_key != updated.match_key
        && games::insert_alias(&mut tx, game_id, &reported_key).await?;

    let own = ownership::upsert(&mut tx, game_id, record, now).await?;
    structural |= own.store_id_recorded || alias_added;

    let saved = if updated != previous {
        games::save_with_identity(&mut tx, updated, &previous).await?
    } else {
        previous.clone()
    };
    if structural {
        bump_generation(&mut *tx).await?;
    }
    let final_generation = generation(&mut *tx).await?;
    tx.commit().await?;

    // Replay this transaction's structural effects onto the cached index.
    // A new IGDB id may have merged two games; reload rather than replay that.
    if saved.id != game_id || saved.igdb_id != previous.igdb_id {
        ctx.invalidate_index();
    } else if let Some(index) = ctx.cached_index_mut() {
        if decision.is_new() || saved.match_key != previous.match_key {
            index.add_alias(saved.id, &saved.match_key);
        }
        if alias_added {
            index.add_alias(saved.id, &reported_key);
        }
        index.add_ownership(saved.id, record.store, own.ownership.store_game_id.as_deref());
        index.set_generation(final_generation);
    }

    Ok(Attempt::Done(ImportOutcome {
        game_id: saved.id,
        is_new: decision.is_new(),
        ownership_inserted: own.inserted,
        decision,
    }))
}

/// Import every record, continuing past record-scoped failures. Already
/// processed records stay committed whatever happens later in the batch.
pub async fn import_batch<I>(
    db: &Db,
    matcher: &IdentityMatcher,
    ctx: &mut SyncContext,
    records: I,
) -> ImportSummary
where
    I: IntoIterator<Item = RawOwnershipRecord>,
{
    for record in records {
        ctx.summary.processed += 1;
        match import_record(db, matcher, ctx, &record).await {
            Ok(outcome) => {
                if outcome.is_new {
                    ctx.summary.created += 1;
                } else {
                    ctx.summary.matched += 1;
                }
                if matches!(
                    outcome.decision,
                    MatchDecision::Create {
                        reason: CreateReason::Ambiguous { .. },
                        ..
                    }
                ) {
                    ctx.summary.ambiguous += 1;
                }
            }
            Err(err @ LibraryError::Validation { .. }) => {
                warn!(target = "sync", store = %record.store, error = %err, "skipping invalid record");
                ctx.summary.skipped += 1;
            }
            Err(err) => {
                warn!(target = "sync", store = %record.store, title = %record.title, error = %err, "record import failed");
                ctx.summary.failed += 1;
                ctx.summary.push_error(format!("{}: {err}", record.title));
            }
        }
    }
    ctx.summary.clone()
}

/// Normalize raw store payloads (exports, bookmarklet posts) and import them.
pub async fn import_payloads(
    db: &Db,
    matcher: &IdentityMatcher,
    normalizer: &RecordNormalizer,
    ctx: &mut SyncContext,
    store: StoreId,
    payloads: &[Value],
) -> ImportSummary {
    let (records, rejected) = normalizer.normalize_batch(store, payloads);
    for err in &rejected {
        warn!(target = "sync", store = %store, error = %err, "skipping invalid record");
    }
    ctx.summary.processed += rejected.len();
    ctx.summary.skipped += rejected.len();
    import_batch(db, matcher, ctx, records).await
}
