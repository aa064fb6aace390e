//! Collection & Discovery Index: derived, read-only views recomputed from the
//! library on every request.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{LibraryEntry, StoreId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryConfig {
    pub section_limit: usize,
    pub highly_rated_min: f64,
    pub hidden_gem_min_rating: f64,
    pub hidden_gem_max_popularity: f64,
    pub critic_favorite_min: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            section_limit: 10,
            highly_rated_min: 90.0,
            hidden_gem_min_rating: 75.0,
            hidden_gem_max_popularity: 50.0,
            critic_favorite_min: 80.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoverySections {
    pub popular: Vec<LibraryEntry>,
    pub highly_rated: Vec<LibraryEntry>,
    pub hidden_gems: Vec<LibraryEntry>,
    pub most_played: Vec<LibraryEntry>,
    pub critic_favorites: Vec<LibraryEntry>,
    pub random_pick: Option<LibraryEntry>,
}

fn visible(entries: &[LibraryEntry]) -> impl Iterator<Item = &LibraryEntry> {
    entries
        .iter()
        .filter(|e| !e.game.hidden && !e.ownership.is_empty())
}

fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// Sorted by the metadata service's popularity metric, most popular first.
pub fn popular(entries: &[LibraryEntry], limit: usize) -> Vec<LibraryEntry> {
    visible(entries)
        .filter_map(|e| e.game.fields.popularity.map(|p| (p, e)))
        .sorted_by(|a, b| desc(a.0, b.0))
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Combined rating at or above `min`, best first.
pub fn highly_rated(entries: &[LibraryEntry], min: f64, limit: usize) -> Vec<LibraryEntry> {
    visible(entries)
        .filter_map(|e| e.game.fields.ratings.aggregated.map(|r| (r, e)))
        .filter(|(r, _)| *r >= min)
        .sorted_by(|a, b| desc(a.0, b.0))
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Well rated but rarely rated: surfaces quality titles few people know about.
/// Games without a popularity figure count as low visibility.
pub fn hidden_gems(entries: &[LibraryEntry], cfg: &DiscoveryConfig) -> Vec<LibraryEntry> {
    visible(entries)
        .filter_map(|e| e.game.fields.ratings.headline().map(|r| (r, e)))
        .filter(|(r, e)| {
            *r >= cfg.hidden_gem_min_rating
                && e
                    .game
                    .fields
                    .popularity
                    .map_or(true, |p| p < cfg.hidden_gem_max_popularity)
        })
        .sorted_by(|a, b| desc(a.0, b.0))
        .take(cfg.section_limit)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Summed playtime across every store owning the game; unplayed games are left out.
pub fn most_played(entries: &[LibraryEntry], limit: usize) -> Vec<LibraryEntry> {
    visible(entries)
        .map(|e| (e.total_playtime_minutes(), e))
        .filter(|(minutes, _)| *minutes > 0)
        .sorted_by(|a, b| b.0.cmp(&a.0))
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect()
}

pub fn critic_favorites(entries: &[LibraryEntry], min: f64, limit: usize) -> Vec<LibraryEntry> {
    visible(entries)
        .filter_map(|e| e.game.fields.ratings.critic.map(|r| (r, e)))
        .filter(|(r, _)| *r >= min)
        .sorted_by(|a, b| desc(a.0, b.0))
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Uniform choice over the whole visible library.
pub fn random_pick<'a, R: Rng + ?Sized>(entries: &'a [LibraryEntry], rng: &mut R) -> Option<&'a LibraryEntry> {
    let pool: Vec<&LibraryEntry> = visible(entries).collect();
    pool.choose(rng).copied()
}

pub fn sections(entries: &[LibraryEntry], cfg: &DiscoveryConfig) -> DiscoverySections {
    let limit = cfg.section_limit;
    DiscoverySections {
        popular: popular(entries, limit),
        highly_rated: highly_rated(entries, cfg.highly_rated_min, limit),
        hidden_gems: hidden_gems(entries, cfg),
        most_played: most_played(entries, limit),
        critic_favorites: critic_favorites(entries, cfg.critic_favorite_min, limit),
        random_pick: random_pick(entries, &mut rand::thread_rng()).cloned(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Playtime,
    Rating,
    ReleaseDate,
    Added,
}

impl FromStr for SortField {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "name" | "title" => Ok(SortField::Name),
            "playtime" | "playtime_hours" => Ok(SortField::Playtime),
            "rating" | "total_rating" => Ok(SortField::Rating),
            "release_date" | "released" => Ok(SortField::ReleaseDate),
            "added" | "created_at" => Ok(SortField::Added),
            other => Err(anyhow!("unknown sort field {other:?}")),
        }
    }
}

/// Filters and ordering for the library listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LibraryQuery {
    #[serde(default)]
    pub stores: Vec<StoreId>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub include_hidden: bool,
}

impl LibraryQuery {
    pub fn matches(&self, entry: &LibraryEntry) -> bool {
        if entry.ownership.is_empty() || (entry.game.hidden && !self.include_hidden) {
            return false;
        }
        if !self.stores.is_empty() && !entry.ownership.iter().any(|o| self.stores.contains(&o.store)) {
            return false;
        }
        if !self.genres.is_empty() {
            let wanted: Vec<String> = self.genres.iter().map(|g| g.to_lowercase()).collect();
            if !entry
                .game
                .fields
                .genres
                .iter()
                .any(|g| wanted.contains(&g.to_lowercase()))
            {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(needle) => entry
                .game
                .canonical_title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }

    /// Filter then sort. Entries without a value for the sort key always come last.
    pub fn apply(&self, entries: Vec<LibraryEntry>) -> Vec<LibraryEntry> {
        let (mut with, without): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .partition(|e| self.has_sort_value(e));
        with.sort_by(|a, b| {
            let ord = self.compare(a, b);
            let ord = if self.descending { ord.reverse() } else { ord };
            ord.then(a.game.id.cmp(&b.game.id))
        });
        with.extend(without.into_iter().sorted_by_key(|e| e.game.id));
        with
    }

    fn has_sort_value(&self, e: &LibraryEntry) -> bool {
        match self.sort {
            SortField::Name | SortField::Added => true,
            SortField::Playtime => e.ownership.iter().any(|o| o.playtime_minutes.is_some()),
            SortField::Rating => e.game.fields.ratings.headline().is_some(),
            SortField::ReleaseDate => e.game.fields.release_date.is_some(),
        }
    }

    fn compare(&self, a: &LibraryEntry, b: &LibraryEntry) -> Ordering {
        match self.sort {
            SortField::Name => a
                .game
                .canonical_title
                .to_lowercase()
                .cmp(&b.game.canonical_title.to_lowercase()),
            SortField::Playtime => a.total_playtime_minutes().cmp(&b.total_playtime_minutes()),
            SortField::Rating => {
                let ra = a.game.fields.ratings.headline().unwrap_or_default();
                let rb = b.game.fields.ratings.headline().unwrap_or_default();
                ra.total_cmp(&rb)
            }
            SortField::ReleaseDate => a.game.fields.release_date.cmp(&b.game.fields.release_date),
            SortField::Added => a.game.created_at.cmp(&b.game.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryStats {
    pub total_games: usize,
    pub hidden_games: usize,
    pub igdb_matched: usize,
    pub per_store: BTreeMap<StoreId, usize>,
    pub total_playtime_minutes: i64,
    pub top_genres: Vec<(String, usize)>,
}

impl LibraryStats {
    pub fn from_entries(entries: &[LibraryEntry]) -> Self {
        let mut stats = LibraryStats::default();
        let mut genres: BTreeMap<String, usize> = BTreeMap::new();
        for entry in entries.iter().filter(|e| !e.ownership.is_empty()) {
            if entry.game.hidden {
                stats.hidden_games += 1;
                continue;
            }
            stats.total_games += 1;
            if entry.game.igdb_id.is_some() {
                stats.igdb_matched += 1;
            }
            for store in entry.stores().into_iter().unique() {
                *stats.per_store.entry(store).or_default() += 1;
            }
            stats.total_playtime_minutes += entry.total_playtime_minutes();
            for genre in &entry.game.fields.genres {
                *genres.entry(genre.to_lowercase()).or_default() += 1;
            }
        }
        stats.top_genres = genres
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(15)
            .collect();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Game, Ownership, Ratings};
    use chrono::{NaiveDate, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entry(id: i64, title: &str, store: StoreId, playtime: Option<i64>) -> LibraryEntry {
        let now = Utc::now();
        LibraryEntry {
            game: Game::new(id, title, title.to_lowercase()),
            ownership: vec![Ownership {
                game_id: id,
                store,
                store_game_id: Some(id.to_string()),
                playtime_minutes: playtime,
                last_played: None,
                store_url: None,
                extra: Default::default(),
                first_seen_at: now,
                last_synced_at: now,
            }],
            collections: vec![],
        }
    }

    fn rated(mut e: LibraryEntry, aggregated: Option<f64>, critic: Option<f64>, popularity: Option<f64>) -> LibraryEntry {
        e.game.fields.ratings = Ratings {
            community: None,
            critic,
            aggregated,
        };
        e.game.fields.popularity = popularity;
        e
    }

    fn ids(entries: &[LibraryEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.game.id).collect()
    }

    fn library() -> Vec<LibraryEntry> {
        let mut hidden = rated(entry(6, "Hidden Masterpiece", StoreId::Gog, Some(999)), Some(99.0), Some(99.0), Some(5000.0));
        hidden.game.hidden = true;
        vec![
            rated(entry(1, "Hades", StoreId::Steam, Some(3000)), Some(93.0), Some(92.0), Some(900.0)),
            rated(entry(2, "Celeste", StoreId::Epic, Some(600)), Some(91.0), None, Some(30.0)),
            rated(entry(3, "Obscure Gem", StoreId::Itch, None), Some(80.0), None, None),
            rated(entry(4, "Mediocre", StoreId::Steam, Some(10)), Some(60.0), Some(82.0), Some(10.0)),
            entry(5, "Unrated", StoreId::Gog, Some(0)),
            hidden,
        ]
    }

    #[test]
    fn sections_follow_definitions() {
        let lib = library();
        let cfg = DiscoveryConfig::default();
        assert_eq!(ids(&popular(&lib, 10)), vec![1, 2, 4]);
        assert_eq!(ids(&highly_rated(&lib, cfg.highly_rated_min, 10)), vec![1, 2]);
        assert_eq!(ids(&hidden_gems(&lib, &cfg)), vec![2, 3]);
        assert_eq!(ids(&most_played(&lib, 10)), vec![1, 2, 4]);
        assert_eq!(ids(&critic_favorites(&lib, cfg.critic_favorite_min, 10)), vec![1, 4]);
        assert_eq!(ids(&popular(&lib, 1)), vec![1]);
    }

    #[test]
    fn most_played_sums_across_stores() {
        let mut multi = entry(10, "Portal 2", StoreId::Steam, Some(100));
        let mut second = entry(10, "Portal 2", StoreId::Epic, Some(250)).ownership;
        multi.ownership.append(&mut second);
        let lib = vec![multi, entry(11, "Braid", StoreId::Gog, Some(300))];
        assert_eq!(ids(&most_played(&lib, 10)), vec![10, 11]);
    }

    #[test]
    fn random_pick_never_returns_hidden_and_covers_library() {
        let lib = library();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let pick = random_pick(&lib, &mut rng).unwrap();
            assert!(!pick.game.hidden);
            seen.insert(pick.game.id);
        }
        assert_eq!(seen.len(), 5);
        assert!(random_pick(&[], &mut rng).is_none());
    }

    #[test]
    fn query_filters_and_sorts_with_nulls_last() {
        let mut lib = library();
        lib[0].game.fields.genres.insert("Roguelike".into());
        lib[1].game.fields.release_date = NaiveDate::from_ymd_opt(2018, 1, 25);
        lib[0].game.fields.release_date = NaiveDate::from_ymd_opt(2020, 9, 17);

        let by_genre = LibraryQuery {
            genres: vec!["roguelike".into()],
            ..Default::default()
        };
        assert_eq!(ids(&by_genre.apply(lib.clone())), vec![1]);

        let steam = LibraryQuery {
            stores: vec![StoreId::Steam],
            ..Default::default()
        };
        assert_eq!(ids(&steam.apply(lib.clone())), vec![1, 4]);

        let newest = LibraryQuery {
            sort: SortField::ReleaseDate,
            descending: true,
            ..Default::default()
        };
        assert_eq!(ids(&newest.apply(lib.clone())), vec![1, 2, 3, 4, 5]);

        let by_rating = LibraryQuery {
            sort: SortField::Rating,
            ..Default::default()
        };
        assert_eq!(ids(&by_rating.apply(lib.clone())), vec![4, 3, 2, 1, 5]);

        let search = LibraryQuery {
            search: Some("MASTER".into()),
            include_hidden: true,
            ..Default::default()
        };
        assert_eq!(ids(&search.apply(lib)), vec![6]);
    }

    #[test]
    fn stats_count_visible_and_hidden() {
        let stats = LibraryStats::from_entries(&library());
        assert_eq!(stats.total_games, 5);
        assert_eq!(stats.hidden_games, 1);
        assert_eq!(stats.per_store.get(&StoreId::Steam), Some(&2));
        assert_eq!(stats.total_playtime_minutes, 3610);
    }

    #[test]
    fn sort_field_parses_aliases() {
        assert_eq!("playtime_hours".parse::<SortField>().unwrap(), SortField::Playtime);
        assert!("price".parse::<SortField>().is_err());
    }
}
