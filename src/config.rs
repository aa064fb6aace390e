//! Library configuration assembled from the environment.
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::discovery::DiscoveryConfig;
use crate::matching::{IdentityMatcher, MatchConfig};
use crate::merge::{EnrichConfig, MetadataResolver, DEFAULT_ENRICH_THRESHOLD};
use crate::normalization::title::{SimilarityKind, DEFAULT_AMBIGUITY_MARGIN, DEFAULT_MATCH_THRESHOLD};
use crate::util::env::{db_url, env_list, env_opt, env_parse, env_parse_opt};

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub similarity: SimilarityKind,
    pub matching: MatchConfig,
    pub enrich: EnrichConfig,
    pub discovery: DiscoveryConfig,
    pub local_roots: Vec<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_url: crate::util::env::DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: 5,
            similarity: SimilarityKind::default(),
            matching: MatchConfig::default(),
            enrich: EnrichConfig::default(),
            discovery: DiscoveryConfig::default(),
            local_roots: Vec::new(),
        }
    }
}

impl LibraryConfig {
    pub fn from_env() -> Result<Self> {
        let similarity = match env_opt("MATCH_ALGORITHM") {
            Some(raw) => raw.parse()?,
            None => SimilarityKind::default(),
        };
        let defaults = DiscoveryConfig::default();
        let cfg = Self {
            database_url: db_url(),
            db_max_connections: env_parse("DB_MAX_CONNS", 5u32).max(1),
            similarity,
            matching: MatchConfig {
                accept_threshold: env_parse("MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
                ambiguity_margin: env_parse("MATCH_MARGIN", DEFAULT_AMBIGUITY_MARGIN),
            },
            enrich: EnrichConfig {
                accept_threshold: env_parse("ENRICH_THRESHOLD", DEFAULT_ENRICH_THRESHOLD),
                limit: env_parse_opt("ENRICH_LIMIT"),
            },
            discovery: DiscoveryConfig {
                section_limit: env_parse("DISCOVER_SECTION_LIMIT", defaults.section_limit),
                highly_rated_min: env_parse("HIGHLY_RATED_MIN", defaults.highly_rated_min),
                hidden_gem_min_rating: env_parse("HIDDEN_GEM_MIN_RATING", defaults.hidden_gem_min_rating),
                hidden_gem_max_popularity: env_parse(
                    "HIDDEN_GEM_MAX_POPULARITY",
                    defaults.hidden_gem_max_popularity,
                ),
                critic_favorite_min: env_parse("CRITIC_FAVORITE_MIN", defaults.critic_favorite_min),
            },
            local_roots: env_list("LOCAL_GAMES_PATHS")
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.matching.accept_threshold) {
            bail!("MATCH_THRESHOLD must be within [0, 1], got {}", self.matching.accept_threshold);
        }
        if !(0.0..1.0).contains(&self.matching.ambiguity_margin) {
            bail!("MATCH_MARGIN must be within [0, 1), got {}", self.matching.ambiguity_margin);
        }
        if !unit.contains(&self.enrich.accept_threshold) {
            bail!("ENRICH_THRESHOLD must be within [0, 1], got {}", self.enrich.accept_threshold);
        }
        Ok(())
    }

    pub fn matcher(&self) -> IdentityMatcher {
        IdentityMatcher::new(self.similarity.build(), self.matching)
    }

    pub fn resolver(&self) -> MetadataResolver {
        MetadataResolver::new(self.similarity.build(), self.enrich)
    }
}
