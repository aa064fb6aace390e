use std::collections::HashMap;

use serde_json::Value;

use crate::model::StoreId;

/// Strategy describing how to interpret a store-provided rating field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatingStrategy {
    /// Value already represents a 0-100 score (Steam review percentage).
    Percent,
    /// Value is a 0-5 float and is scaled up.
    ZeroToFive,
    /// Value is 0-50 (GOG's internal rating).
    ZeroToFifty,
    /// Value is a string like "4.5 stars".
    StarString,
}

#[derive(Debug, Clone)]
pub struct RatingAlias {
    pub field: &'static str,
    pub strategy: RatingStrategy,
}

impl RatingAlias {
    pub const fn new(field: &'static str, strategy: RatingStrategy) -> Self {
        Self { field, strategy }
    }
}

/// Maps store payloads into a community rating on the library's 0-100 scale.
#[derive(Debug, Default, Clone)]
pub struct RatingMapper {
    aliases: HashMap<StoreId, Vec<RatingAlias>>,
}

impl RatingMapper {
    /// Mapper seeded with the fields the supported storefronts export.
    pub fn with_defaults() -> Self {
        Self::default()
            .register(
                StoreId::Steam,
                RatingAlias::new("review_score", RatingStrategy::Percent),
            )
            .register(
                StoreId::Steam,
                RatingAlias::new("critics_score", RatingStrategy::Percent),
            )
            .register(
                StoreId::Gog,
                RatingAlias::new("rating", RatingStrategy::ZeroToFifty),
            )
            .register(
                StoreId::Itch,
                RatingAlias::new("rating", RatingStrategy::ZeroToFive),
            )
            .register(
                StoreId::Xbox,
                RatingAlias::new("average_rating", RatingStrategy::ZeroToFive),
            )
            .register(
                StoreId::Epic,
                RatingAlias::new("rating", RatingStrategy::StarString),
            )
    }

    /// Add an alias for a store; earlier registrations are tried first.
    pub fn register(mut self, store: StoreId, alias: RatingAlias) -> Self {
        self.aliases.entry(store).or_default().push(alias);
        self
    }

    /// First alias of `store` present in `payload`, mapped to 0-100.
    pub fn map(&self, store: StoreId, payload: &Value) -> Option<f64> {
        self.aliases
            .get(&store)?
            .iter()
            .find_map(|alias| map_value(alias, payload.get(alias.field)?))
    }
}

fn map_value(alias: &RatingAlias, value: &Value) -> Option<f64> {
    let numeric = || value.as_f64().or_else(|| value.as_str()?.trim().parse().ok());
    let rating = match alias.strategy {
        RatingStrategy::Percent => numeric()?,
        RatingStrategy::ZeroToFive => numeric()? * 20.0,
        RatingStrategy::ZeroToFifty => numeric()? * 2.0,
        RatingStrategy::StarString => parse_star_string(value.as_str()?)? * 20.0,
    };
    if (0.0..=100.0).contains(&rating) {
        Some(rating)
    } else {
        None
    }
}

fn parse_star_string(input: &str) -> Option<f64> {
    let digits: String = input
        .trim()
        .chars()
        .take_while(|c| *c != ' ')
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_default_aliases() {
        let mapper = RatingMapper::with_defaults();
        assert_eq!(mapper.map(StoreId::Steam, &json!({"review_score": 93})), Some(93.0));
        assert_eq!(mapper.map(StoreId::Gog, &json!({"rating": 45})), Some(90.0));
        assert_eq!(mapper.map(StoreId::Itch, &json!({"rating": "4.5"})), Some(90.0));
        assert_eq!(
            mapper.map(StoreId::Epic, &json!({"rating": "4.5 stars"})),
            Some(90.0)
        );
    }

    #[test]
    fn falls_through_to_later_alias() {
        let mapper = RatingMapper::with_defaults();
        assert_eq!(mapper.map(StoreId::Steam, &json!({"critics_score": 81})), Some(81.0));
    }

    #[test]
    fn rejects_out_of_range_and_unknown() {
        let mapper = RatingMapper::with_defaults();
        assert_eq!(mapper.map(StoreId::Steam, &json!({"review_score": 130})), None);
        assert_eq!(mapper.map(StoreId::Ubisoft, &json!({"rating": 4})), None);
        assert_eq!(mapper.map(StoreId::Gog, &json!({"rating": null})), None);
    }
}
