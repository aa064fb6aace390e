//! Identity Matcher: decides which canonical game a raw ownership record belongs to.
//!
//! Resolution is a pure function of the record and a [`LibraryIndex`] snapshot;
//! persisting the decision is the import unit's job.
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LibraryError, LibraryResult};
use crate::model::{RawOwnershipRecord, StoreId};
use crate::normalization::title::{
    display_title, SimilarityKind, TitleKey, TitleSimilarity, DEFAULT_AMBIGUITY_MARGIN,
    DEFAULT_MATCH_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Minimum similarity for a fuzzy title match.
    pub accept_threshold: f64,
    /// The best candidate must beat the runner-up by at least this much.
    pub ambiguity_margin: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_MATCH_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
        }
    }
}

/// In-memory view of everything identity resolution reads: external ids,
/// store ids, canonical title keys and aliases.
///
/// `generation` mirrors the persisted structural generation the snapshot was
/// loaded at; a mismatch means another writer changed the library since.
#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
    generation: i64,
    by_igdb: HashMap<i64, i64>,
    by_store_id: HashMap<(StoreId, String), i64>,
    owned: HashMap<(i64, StoreId), Option<String>>,
    keys: Vec<(i64, TitleKey)>,
}

impl LibraryIndex {
    pub fn new(generation: i64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: i64) {
        self.generation = generation;
    }

    pub fn add_game(&mut self, game_id: i64, igdb_id: Option<i64>, match_key: &str) {
        if let Some(igdb_id) = igdb_id {
            self.by_igdb.insert(igdb_id, game_id);
        }
        self.add_alias(game_id, match_key);
    }

    /// Register another title key resolving to `game_id`. Empty and duplicate keys are ignored.
    pub fn add_alias(&mut self, game_id: i64, key: &str) {
        let key = TitleKey::from_normalized(key);
        if key.is_empty() || self.keys.iter().any(|(id, k)| *id == game_id && *k == key) {
            return;
        }
        self.keys.push((game_id, key));
    }

    pub fn set_igdb_id(&mut self, game_id: i64, igdb_id: i64) {
        self.by_igdb.retain(|_, id| *id != game_id);
        self.by_igdb.insert(igdb_id, game_id);
    }

    pub fn add_ownership(&mut self, game_id: i64, store: StoreId, store_game_id: Option<&str>) {
        let entry = self.owned.entry((game_id, store)).or_insert(None);
        if entry.is_none() {
            if let Some(id) = store_game_id.filter(|id| !id.is_empty()) {
                *entry = Some(id.to_string());
                self.by_store_id.insert((store, id.to_string()), game_id);
            }
        }
    }

    pub fn remove_game(&mut self, game_id: i64) {
        self.by_igdb.retain(|_, id| *id != game_id);
        self.by_store_id.retain(|_, id| *id != game_id);
        self.owned.retain(|(id, _), _| *id != game_id);
        self.keys.retain(|(id, _)| *id != game_id);
    }

    pub fn game_for_igdb(&self, igdb_id: i64) -> Option<i64> {
        self.by_igdb.get(&igdb_id).copied()
    }

    pub fn game_for_store_id(&self, store: StoreId, store_game_id: &str) -> Option<i64> {
        self.by_store_id
            .get(&(store, store_game_id.to_string()))
            .copied()
    }

    /// A game already owned on `store` under a different store id is a different product.
    fn store_compatible(&self, game_id: i64, store: StoreId, store_game_id: Option<&str>) -> bool {
        match (self.owned.get(&(game_id, store)), store_game_id) {
            (Some(Some(existing)), Some(incoming)) => existing == incoming,
            _ => true,
        }
    }
}

/// How an existing game was found.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum MatchPath {
    OverrideId,
    Ownership,
    Title { score: f64 },
}

/// Why a new game has to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CreateReason {
    NoCandidate,
    BelowThreshold {
        best_score: f64,
    },
    /// Two candidates scored within the ambiguity margin; guessing could merge two different games.
    Ambiguous {
        first: i64,
        first_score: f64,
        second: i64,
        second_score: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    Existing {
        game_id: i64,
        via: MatchPath,
    },
    Create {
        canonical_title: String,
        match_key: String,
        reason: CreateReason,
    },
}

impl MatchDecision {
    pub fn game_id(&self) -> Option<i64> {
        match self {
            MatchDecision::Existing { game_id, .. } => Some(*game_id),
            MatchDecision::Create { .. } => None,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MatchDecision::Create { .. })
    }

    /// Whether the match came from an id rather than a title, so the record's
    /// own title can safely be remembered as an alias.
    pub fn is_id_match(&self) -> bool {
        matches!(
            self,
            MatchDecision::Existing {
                via: MatchPath::OverrideId | MatchPath::Ownership,
                ..
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    similarity: Arc<dyn TitleSimilarity>,
    config: MatchConfig,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(SimilarityKind::default().build(), MatchConfig::default())
    }
}

impl IdentityMatcher {
    pub fn new(similarity: Arc<dyn TitleSimilarity>, config: MatchConfig) -> Self {
        Self { similarity, config }
    }

    pub fn config(&self) -> MatchConfig {
        self.config
    }

    pub fn similarity(&self) -> &dyn TitleSimilarity {
        self.similarity.as_ref()
    }

    /// Resolve a record against the index. First hit wins:
    /// override id, existing ownership, fuzzy title, otherwise create.
    pub fn resolve(
        &self,
        record: &RawOwnershipRecord,
        index: &LibraryIndex,
    ) -> LibraryResult<MatchDecision> {
        let title = record.effective_title();
        if title.is_empty() {
            return Err(LibraryError::validation(record.store, "missing title"));
        }

        if let Some(game_id) = record
            .override_igdb_id()
            .and_then(|igdb_id| index.game_for_igdb(igdb_id))
        {
            return Ok(MatchDecision::Existing {
                game_id,
                via: MatchPath::OverrideId,
            });
        }

        let store_game_id = record.store_game_id.as_deref().filter(|id| !id.is_empty());
        if let Some(game_id) =
            store_game_id.and_then(|id| index.game_for_store_id(record.store, id))
        {
            return Ok(MatchDecision::Existing {
                game_id,
                via: MatchPath::Ownership,
            });
        }

        let key = TitleKey::new(title);
        let reason = match self.best_title_match(&key, record.store, store_game_id, index) {
            Ok((game_id, score)) => {
                debug!(target = "matcher", store = %record.store, title, game_id, score, "fuzzy title match");
                return Ok(MatchDecision::Existing {
                    game_id,
                    via: MatchPath::Title { score },
                });
            }
            Err(reason) => reason,
        };

        if let CreateReason::Ambiguous {
            first,
            first_score,
            second,
            second_score,
        } = reason
        {
            let err = LibraryError::AmbiguousMatch {
                title: title.to_string(),
                first,
                first_score,
                second,
                second_score,
            };
            warn!(target = "matcher", store = %record.store, error = %err, "creating new game instead of guessing");
        }

        Ok(MatchDecision::Create {
            canonical_title: display_title(title),
            match_key: key.normalized().to_string(),
            reason,
        })
    }

    fn best_title_match(
        &self,
        key: &TitleKey,
        store: StoreId,
        store_game_id: Option<&str>,
        index: &LibraryIndex,
    ) -> Result<(i64, f64), CreateReason> {
        if key.is_empty() {
            return Err(CreateReason::NoCandidate);
        }

        let mut exact: Option<i64> = None;
        let mut best_per_game: HashMap<i64, f64> = HashMap::new();
        for (game_id, candidate) in &index.keys {
            if !key.numeric_compatible(candidate)
                || !index.store_compatible(*game_id, store, store_game_id)
            {
                continue;
            }
            if candidate.normalized() == key.normalized() {
                // Identical keys only coexist after an ambiguous create; the oldest game wins.
                exact = Some(exact.map_or(*game_id, |id| id.min(*game_id)));
                continue;
            }
            let score = self.similarity.score(key.normalized(), candidate.normalized());
            let best = best_per_game.entry(*game_id).or_insert(score);
            *best = best.max(score);
        }
        if let Some(game_id) = exact {
            return Ok((game_id, 1.0));
        }

        let mut ranked: Vec<(i64, f64)> = best_per_game.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let Some(&(best_id, best_score)) = ranked.first() else {
            return Err(CreateReason::NoCandidate);
        };
        if best_score < self.config.accept_threshold {
            return Err(CreateReason::BelowThreshold { best_score });
        }
        if let Some(&(second_id, second_score)) = ranked.get(1) {
            if best_score - second_score < self.config.ambiguity_margin {
                return Err(CreateReason::Ambiguous {
                    first: best_id,
                    first_score: best_score,
                    second: second_id,
                    second_score,
                });
            }
        }
        Ok((best_id, best_score))
    }
}
