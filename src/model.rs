//! Core library entities shared by the matcher, the merge resolver, the ledger
//! and the read surfaces.
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Storefront (or local source) that reported an ownership record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreId {
    Steam,
    Epic,
    Gog,
    Amazon,
    Itch,
    Humble,
    Battlenet,
    Ea,
    Ubisoft,
    Xbox,
    Local,
}

impl StoreId {
    pub const ALL: [StoreId; 11] = [
        StoreId::Steam,
        StoreId::Epic,
        StoreId::Gog,
        StoreId::Amazon,
        StoreId::Itch,
        StoreId::Humble,
        StoreId::Battlenet,
        StoreId::Ea,
        StoreId::Ubisoft,
        StoreId::Xbox,
        StoreId::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreId::Steam => "steam",
            StoreId::Epic => "epic",
            StoreId::Gog => "gog",
            StoreId::Amazon => "amazon",
            StoreId::Itch => "itch",
            StoreId::Humble => "humble",
            StoreId::Battlenet => "battlenet",
            StoreId::Ea => "ea",
            StoreId::Ubisoft => "ubisoft",
            StoreId::Xbox => "xbox",
            StoreId::Local => "local",
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreId {
    type Err = anyhow::Error;

    /// Accepts the canonical slug plus the spellings storefronts use for
    /// themselves ("itch.io", "Battle.net", "GOG.com", "EA app").
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let store = match key.as_str() {
            "steam" => StoreId::Steam,
            "epic" | "epicgames" | "egs" => StoreId::Epic,
            "gog" | "gogcom" => StoreId::Gog,
            "amazon" | "amazongames" | "prime" => StoreId::Amazon,
            "itch" | "itchio" => StoreId::Itch,
            "humble" | "humblebundle" => StoreId::Humble,
            "battlenet" | "bnet" | "blizzard" => StoreId::Battlenet,
            "ea" | "eaapp" | "origin" => StoreId::Ea,
            "ubisoft" | "uplay" | "ubisoftconnect" => StoreId::Ubisoft,
            "xbox" | "microsoft" => StoreId::Xbox,
            "local" => StoreId::Local,
            _ => return Err(anyhow!("unknown store {raw:?}")),
        };
        Ok(store)
    }
}

/// Community / critic / combined ratings, all on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(default)]
    pub community: Option<f64>,
    #[serde(default)]
    pub critic: Option<f64>,
    #[serde(default)]
    pub aggregated: Option<f64>,
}

impl Ratings {
    pub fn is_empty(&self) -> bool {
        self.community.is_none() && self.critic.is_none() && self.aggregated.is_none()
    }

    /// Best single score for sorting: the combined rating, else critic, else community.
    pub fn headline(&self) -> Option<f64> {
        self.aggregated.or(self.critic).or(self.community)
    }
}

/// The descriptive metadata of a game. Used both for the resolved view on
/// [`Game`] and for each precedence layer that feeds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameFields {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub developers: IndexSet<String>,
    #[serde(default)]
    pub genres: IndexSet<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub ratings: Ratings,
    /// Popularity metric reported by the metadata service (higher is more visible).
    #[serde(default)]
    pub popularity: Option<f64>,
}

/// User-supplied metadata (a local folder's `game.json`, or an explicit edit).
/// Every field is optional; present fields win over any automated source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameOverride {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub igdb_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub developers: Option<Vec<String>>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    /// Free-form date ("2016-05-13", "2016-05", "2016").
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    /// User's NSFW verdict; beats whatever the metadata service reports.
    #[serde(default)]
    pub nsfw: Option<bool>,
}

impl GameOverride {
    pub fn is_empty(&self) -> bool {
        self == &GameOverride::default()
    }
}

/// Raw inputs a game's resolved fields are computed from, highest precedence first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataLayers {
    #[serde(default)]
    pub overrides: GameOverride,
    #[serde(default)]
    pub metadata: GameFields,
    #[serde(default)]
    pub store: GameFields,
}

/// Canonical game: one per real-world title, whatever the number of stores owning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub canonical_title: String,
    /// Normalized form of `canonical_title` used by the identity matcher.
    pub match_key: String,
    pub igdb_id: Option<i64>,
    #[serde(flatten)]
    pub fields: GameFields,
    pub hidden: bool,
    pub nsfw: bool,
    pub layers: MetadataLayers,
    pub metadata_fetched_at: Option<DateTime<Utc>>,
    pub metadata_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// Fresh canonical game with empty metadata, as the creation path makes it.
    pub fn new(id: i64, canonical_title: impl Into<String>, match_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            canonical_title: canonical_title.into(),
            match_key: match_key.into(),
            igdb_id: None,
            fields: GameFields::default(),
            hidden: false,
            nsfw: false,
            layers: MetadataLayers::default(),
            metadata_fetched_at: None,
            metadata_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ownership of one canonical game on one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    pub game_id: i64,
    pub store: StoreId,
    pub store_game_id: Option<String>,
    pub playtime_minutes: Option<i64>,
    pub last_played: Option<DateTime<Utc>>,
    pub store_url: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

/// A store's claim that the account owns a title, before identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOwnershipRecord {
    pub store: StoreId,
    #[serde(default)]
    pub store_game_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub playtime_minutes: Option<i64>,
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
    #[serde(default)]
    pub store_url: Option<String>,
    /// Metadata the store itself provided (lowest precedence layer).
    #[serde(default)]
    pub native: GameFields,
    #[serde(default)]
    pub overrides: Option<GameOverride>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl RawOwnershipRecord {
    pub fn new(store: StoreId, title: impl Into<String>) -> Self {
        Self {
            store,
            store_game_id: None,
            title: title.into(),
            playtime_minutes: None,
            last_played: None,
            store_url: None,
            native: GameFields::default(),
            overrides: None,
            extra: Map::new(),
        }
    }

    pub fn with_store_game_id(mut self, id: impl Into<String>) -> Self {
        self.store_game_id = Some(id.into());
        self
    }

    pub fn with_playtime(mut self, minutes: i64) -> Self {
        self.playtime_minutes = Some(minutes);
        self
    }

    pub fn with_overrides(mut self, overrides: GameOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// External metadata id carried by an override, if any.
    pub fn override_igdb_id(&self) -> Option<i64> {
        self.overrides
            .as_ref()
            .and_then(|o| o.igdb_id)
            .filter(|id| *id > 0)
    }

    /// Title used for identity: an override name beats what the store reported.
    pub fn effective_title(&self) -> &str {
        self.overrides
            .as_ref()
            .and_then(|o| o.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.title.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverStrategy {
    /// Cover of the first game in the collection.
    #[default]
    FirstGame,
    /// Grid of the first four covers.
    Mosaic,
}

impl CoverStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverStrategy::FirstGame => "first_game",
            CoverStrategy::Mosaic => "mosaic",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "mosaic" => CoverStrategy::Mosaic,
            _ => CoverStrategy::FirstGame,
        }
    }
}

/// User-defined, ordered grouping of games. Never touched by sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cover_strategy: CoverStrategy,
    pub game_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ranked search hit returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCandidate {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub release_year: Option<i32>,
}

/// Full metadata record returned by the metadata service for one id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub developers: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub ratings: Ratings,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub nsfw: bool,
}

/// A game joined with its ownership rows and collection membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub game: Game,
    pub ownership: Vec<Ownership>,
    #[serde(default)]
    pub collections: Vec<i64>,
}

impl LibraryEntry {
    pub fn total_playtime_minutes(&self) -> i64 {
        self.ownership
            .iter()
            .filter_map(|o| o.playtime_minutes)
            .sum()
    }

    pub fn stores(&self) -> Vec<StoreId> {
        self.ownership.iter().map(|o| o.store).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_parse_accepts_storefront_spellings() {
        assert_eq!("itch.io".parse::<StoreId>().unwrap(), StoreId::Itch);
        assert_eq!("Battle.net".parse::<StoreId>().unwrap(), StoreId::Battlenet);
        assert_eq!("GOG.com".parse::<StoreId>().unwrap(), StoreId::Gog);
        assert!("origin-of-species".parse::<StoreId>().is_err());
        for store in StoreId::ALL {
            assert_eq!(store.as_str().parse::<StoreId>().unwrap(), store);
        }
    }

    #[test]
    fn effective_title_prefers_override_name() {
        let rec = RawOwnershipRecord::new(StoreId::Local, "doom_2016").with_overrides(GameOverride {
            name: Some("DOOM (2016)".into()),
            igdb_id: Some(7351),
            ..Default::default()
        });
        assert_eq!(rec.effective_title(), "DOOM (2016)");
        assert_eq!(rec.override_igdb_id(), Some(7351));

        let blank = RawOwnershipRecord::new(StoreId::Local, " Celeste ").with_overrides(GameOverride {
            name: Some("  ".into()),
            igdb_id: Some(0),
            ..Default::default()
        });
        assert_eq!(blank.effective_title(), "Celeste");
        assert_eq!(blank.override_igdb_id(), None);
    }

    #[test]
    fn raw_record_deserializes_with_defaults() {
        let rec: RawOwnershipRecord =
            serde_json::from_value(serde_json::json!({"store": "steam", "title": "Portal 2"}))
                .unwrap();
        assert_eq!(rec.store, StoreId::Steam);
        assert!(rec.store_game_id.is_none());
        assert!(rec.native.genres.is_empty());
    }
}
