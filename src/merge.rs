//! Metadata Merge Resolver.
//!
//! A game keeps three raw layers (user override, metadata service, store-native)
//! and its visible fields are resolved per field, highest layer first. Automatic
//! enrichment only ever writes the metadata layer, so overrides survive any pass.
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::error::{LibraryError, LibraryResult};
use crate::model::{
    Game, GameFields, GameOverride, MetadataCandidate, MetadataLayers, MetadataRecord, Ratings,
};
use crate::normalization::record::parse_release_date;
use crate::normalization::title::{display_title, normalize_title, SimilarityKind, TitleKey, TitleSimilarity};

pub const DEFAULT_ENRICH_THRESHOLD: f64 = 0.85;

/// External metadata database (IGDB-like). Errors and empty results both mean "no match".
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Ranked candidates, best first.
    async fn search_by_title(&self, title: &str) -> anyhow::Result<Vec<MetadataCandidate>>;
    async fn fetch_by_id(&self, id: i64) -> anyhow::Result<Option<MetadataRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichConfig {
    /// Minimum similarity between the top search hit and the canonical title.
    pub accept_threshold: f64,
    /// Cap on games looked up per pass.
    pub limit: Option<usize>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ENRICH_THRESHOLD,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnrichMode {
    /// Only games still missing cover, rating or description; only empty fields are filled.
    #[default]
    Missing,
    /// Explicit user refresh: every game, metadata layer replaced wholesale.
    All,
}

impl FromStr for EnrichMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "missing" => Ok(EnrichMode::Missing),
            "all" => Ok(EnrichMode::All),
            other => Err(anyhow!("unknown enrich mode {other:?}")),
        }
    }
}

impl GameFields {
    /// Fill every empty field from `lower`, leaving populated ones alone.
    pub fn fill_missing_from(&mut self, lower: &GameFields) {
        if self.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
            self.description.clone_from(&lower.description);
        }
        if self.developers.is_empty() {
            self.developers.clone_from(&lower.developers);
        }
        if self.genres.is_empty() {
            self.genres.clone_from(&lower.genres);
        }
        self.release_date = self.release_date.or(lower.release_date);
        if self.cover_image_url.is_none() {
            self.cover_image_url.clone_from(&lower.cover_image_url);
        }
        self.ratings = Ratings {
            community: self.ratings.community.or(lower.ratings.community),
            critic: self.ratings.critic.or(lower.ratings.critic),
            aggregated: self.ratings.aggregated.or(lower.ratings.aggregated),
        };
        self.popularity = self.popularity.or(lower.popularity);
    }
}

/// Case-insensitive dedupe, first spelling wins.
pub fn dedupe_tags<I, S>(items: I) -> IndexSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = IndexSet::new();
    let mut out = IndexSet::new();
    for item in items {
        let item = item.as_ref().trim();
        if !item.is_empty() && seen.insert(item.to_lowercase()) {
            out.insert(item.to_string());
        }
    }
    out
}

impl From<&GameOverride> for GameFields {
    fn from(o: &GameOverride) -> Self {
        GameFields {
            description: o
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            developers: o.developers.as_deref().map(dedupe_tags).unwrap_or_default(),
            genres: o.genres.as_deref().map(dedupe_tags).unwrap_or_default(),
            release_date: o.release_date.as_deref().and_then(parse_release_date),
            cover_image_url: o.cover_image.clone().filter(|c| !c.trim().is_empty()),
            ..GameFields::default()
        }
    }
}

impl From<&MetadataRecord> for GameFields {
    fn from(r: &MetadataRecord) -> Self {
        GameFields {
            description: r.summary.clone().filter(|s| !s.trim().is_empty()),
            developers: dedupe_tags(&r.developers),
            genres: dedupe_tags(&r.genres),
            release_date: r.release_date,
            cover_image_url: r.cover_url.clone(),
            ratings: r.ratings,
            popularity: r.popularity,
        }
    }
}

/// Resolved view: override, then metadata service, then store-native, per field.
pub fn resolve_fields(layers: &MetadataLayers) -> GameFields {
    let mut fields = GameFields::from(&layers.overrides);
    fields.fill_missing_from(&layers.metadata);
    fields.fill_missing_from(&layers.store);
    fields
}

/// A game is re-enriched only while it lacks a cover, any rating, or a description.
pub fn needs_enrichment(game: &Game) -> bool {
    game.fields.cover_image_url.is_none()
        || game.fields.ratings.is_empty()
        || game.fields.description.is_none()
}

/// Merge a user override into the game. Fields present in `ov` replace earlier
/// override values; absent fields keep them. A new name renames the game; a new
/// IGDB id drops metadata fetched for the old one.
pub fn apply_override(mut game: Game, ov: &GameOverride) -> Game {
    let current = &mut game.layers.overrides;
    if let Some(name) = ov.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        current.name = Some(name.to_string());
        let title = display_title(name);
        if title != game.canonical_title {
            game.match_key = normalize_title(&title);
            game.canonical_title = title;
        }
    }
    if let Some(igdb_id) = ov.igdb_id.filter(|id| *id > 0) {
        current.igdb_id = Some(igdb_id);
        if game.igdb_id != Some(igdb_id) {
            game.igdb_id = Some(igdb_id);
            game.layers.metadata = GameFields::default();
            game.metadata_fetched_at = None;
            game.metadata_checked_at = None;
        }
    }
    if ov.description.is_some() {
        current.description.clone_from(&ov.description);
    }
    if ov.developers.is_some() {
        current.developers.clone_from(&ov.developers);
    }
    if ov.genres.is_some() {
        current.genres.clone_from(&ov.genres);
    }
    if ov.release_date.is_some() {
        current.release_date.clone_from(&ov.release_date);
    }
    if ov.cover_image.is_some() {
        current.cover_image.clone_from(&ov.cover_image);
    }
    if let Some(nsfw) = ov.nsfw {
        current.nsfw = Some(nsfw);
        game.nsfw = nsfw;
    }
    refresh_resolved(&mut game);
    game
}

/// NSFW flag after a source reports `detected`: a user verdict wins, otherwise
/// the flag is sticky once any source set it.
pub fn resolve_nsfw(game: &Game, detected: bool) -> bool {
    game.layers.overrides.nsfw.unwrap_or(game.nsfw || detected)
}

/// Drop the IGDB link and everything fetched for it. The game counts as
/// checked, so automatic passes revisit it after never-checked games.
pub fn clear_igdb(mut game: Game) -> Game {
    game.igdb_id = None;
    game.layers.overrides.igdb_id = None;
    game.layers.metadata = GameFields::default();
    game.metadata_fetched_at = None;
    game.metadata_checked_at = Some(Utc::now());
    refresh_resolved(&mut game);
    game
}

/// Fold a store's native fields into the store layer (gaps only).
pub fn apply_store_fields(mut game: Game, native: &GameFields) -> Game {
    game.layers.store.fill_missing_from(native);
    refresh_resolved(&mut game);
    game
}

/// Write a metadata record into the metadata layer and persist its id on the game.
pub fn apply_metadata(mut game: Game, record: &MetadataRecord, mode: EnrichMode) -> Game {
    let incoming = GameFields::from(record);
    match mode {
        EnrichMode::Missing => game.layers.metadata.fill_missing_from(&incoming),
        EnrichMode::All => game.layers.metadata = incoming,
    }
    game.igdb_id = Some(record.id);
    game.nsfw = resolve_nsfw(&game, record.nsfw);
    let now = Utc::now();
    game.metadata_fetched_at = Some(now);
    game.metadata_checked_at = Some(now);
    refresh_resolved(&mut game);
    game
}

pub fn refresh_resolved(game: &mut Game) {
    game.fields = resolve_fields(&game.layers);
    game.updated_at = Utc::now();
}

/// Looks up and merges external metadata for one game at a time.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    similarity: Arc<dyn TitleSimilarity>,
    config: EnrichConfig,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new(SimilarityKind::default().build(), EnrichConfig::default())
    }
}

impl MetadataResolver {
    pub fn new(similarity: Arc<dyn TitleSimilarity>, config: EnrichConfig) -> Self {
        Self { similarity, config }
    }

    pub fn config(&self) -> EnrichConfig {
        self.config
    }

    /// Enrich one game. A known IGDB id is fetched directly; otherwise the top
    /// search hit is accepted only when its title clears the threshold against
    /// the canonical title. A rejected or failed lookup leaves metadata empty.
    pub async fn enrich(
        &self,
        game: Game,
        service: &dyn MetadataService,
        mode: EnrichMode,
    ) -> LibraryResult<Game> {
        let not_found = || LibraryError::MetadataNotFound {
            game_id: game.id,
            title: game.canonical_title.clone(),
        };

        let igdb_id = match game.igdb_id {
            Some(id) => id,
            None => {
                let top = self.search_top(&game, service).await.ok_or_else(not_found)?;
                top.id
            }
        };

        let record = match service.fetch_by_id(igdb_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(target = "enrich", game_id = game.id, igdb_id, "metadata id returned nothing");
                return Err(not_found());
            }
            Err(err) => {
                warn!(target = "enrich", game_id = game.id, igdb_id, error = %err, "metadata fetch failed");
                return Err(not_found());
            }
        };
        Ok(apply_metadata(game, &record, mode))
    }

    async fn search_top(&self, game: &Game, service: &dyn MetadataService) -> Option<MetadataCandidate> {
        let candidates = match service.search_by_title(&game.match_key).await {
            Ok(c) => c,
            Err(err) => {
                warn!(target = "enrich", game_id = game.id, error = %err, "metadata search failed");
                return None;
            }
        };
        let top = candidates.into_iter().next()?;
        let score = self.candidate_score(&game.match_key, &top.title);
        if score < self.config.accept_threshold {
            debug!(
                target = "enrich",
                game_id = game.id,
                title = %game.canonical_title,
                candidate = %top.title,
                score,
                "top metadata candidate rejected"
            );
            return None;
        }
        Some(top)
    }

    fn candidate_score(&self, match_key: &str, candidate_title: &str) -> f64 {
        let ours = TitleKey::from_normalized(match_key);
        let theirs = TitleKey::new(candidate_title);
        if !ours.numeric_compatible(&theirs) {
            return 0.0;
        }
        if ours.normalized() == theirs.normalized() {
            return 1.0;
        }
        self.similarity.score(ours.normalized(), theirs.normalized())
    }
}
