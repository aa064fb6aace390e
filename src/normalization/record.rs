//! Converts each store's sync output into the common [`RawOwnershipRecord`] shape.
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexSet;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LibraryError, LibraryResult};
use crate::model::{GameFields, GameOverride, RawOwnershipRecord, StoreId};
use crate::normalization::rating::RatingMapper;
use crate::normalization::title::{display_title, normalize_title};

const TITLE_KEYS: &[&str] = &["title", "name", "human_name", "displayName", "display_name"];
const PLAYTIME_MINUTE_KEYS: &[&str] = &["playtime_minutes", "playtime_forever"];
const LAST_PLAYED_KEYS: &[&str] = &["last_played", "lastPlayed", "rtime_last_played"];
const STORE_URL_KEYS: &[&str] = &["store_url", "storeUrl", "url"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary", "short_description"];
const RELEASE_KEYS: &[&str] = &["release_date", "releaseDate"];
const COVER_KEYS: &[&str] = &["cover_image", "cover_url", "coverUrl", "cover"];

fn id_keys(store: StoreId) -> &'static [&'static str] {
    match store {
        StoreId::Steam => &["appid", "app_id", "store_id", "id"],
        StoreId::Epic => &["app_name", "appName", "store_id", "id"],
        StoreId::Humble => &["machine_name", "store_id", "id"],
        StoreId::Ea => &["offerId", "offer_id", "store_id", "id"],
        StoreId::Xbox => &["productId", "product_id", "store_id", "id"],
        StoreId::Gog | StoreId::Amazon => &["id", "product_id", "store_id"],
        StoreId::Itch => &["id", "game_id", "store_id"],
        StoreId::Battlenet | StoreId::Ubisoft | StoreId::Local => &["store_id", "id"],
    }
}

/// Normalizes heterogeneous store payloads (API exports, CLI dumps, bookmarklet scrapes).
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    ratings: RatingMapper,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self {
            ratings: RatingMapper::with_defaults(),
        }
    }
}

impl RecordNormalizer {
    pub fn new(ratings: RatingMapper) -> Self {
        Self { ratings }
    }

    /// Normalize one payload. A payload without a usable title is a validation error.
    pub fn normalize(&self, store: StoreId, payload: &Value) -> LibraryResult<RawOwnershipRecord> {
        let obj = payload
            .as_object()
            .ok_or_else(|| LibraryError::validation(store, "payload is not an object"))?;

        let raw_title = first_str(obj, TITLE_KEYS)
            .ok_or_else(|| LibraryError::validation(store, "missing title"))?;
        let title = display_title(raw_title);
        if title.is_empty() {
            return Err(LibraryError::validation(store, "blank title"));
        }

        let store_game_id = id_keys(store)
            .iter()
            .find_map(|k| obj.get(*k).and_then(value_to_id))
            // Slugged from the normalized title so edition variants keep one id.
            .or_else(|| Some(slugify(&normalize_title(&title))).filter(|s| !s.is_empty()));

        let mut record = RawOwnershipRecord::new(store, title);
        record.store_game_id = store_game_id;
        record.playtime_minutes = playtime_minutes(obj);
        record.last_played = LAST_PLAYED_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(parse_timestamp));
        record.store_url = first_str(obj, STORE_URL_KEYS)
            .map(str::to_string)
            .or_else(|| derive_store_url(store, record.store_game_id.as_deref(), obj));
        record.native = self.native_fields(store, obj, payload);
        if store == StoreId::Local {
            record.overrides = local_overrides(obj);
        }
        record.extra = obj.clone();

        debug!(
            target = "normalizer",
            store = %store,
            title = %record.title,
            store_game_id = ?record.store_game_id,
            "normalized store record"
        );
        Ok(record)
    }

    /// Normalize a batch, returning accepted records and the rejected ones' errors.
    pub fn normalize_batch(
        &self,
        store: StoreId,
        payloads: &[Value],
    ) -> (Vec<RawOwnershipRecord>, Vec<LibraryError>) {
        let mut records = Vec::with_capacity(payloads.len());
        let mut rejected = Vec::new();
        for payload in payloads {
            match self.normalize(store, payload) {
                Ok(rec) => records.push(rec),
                Err(err) => rejected.push(err),
            }
        }
        (records, rejected)
    }

    fn native_fields(&self, store: StoreId, obj: &Map<String, Value>, payload: &Value) -> GameFields {
        let mut fields = GameFields {
            description: first_str(obj, DESCRIPTION_KEYS).map(str::to_string),
            developers: string_set(obj.get("developers").or_else(|| obj.get("developer"))),
            genres: string_set(obj.get("genres")),
            release_date: first_str(obj, RELEASE_KEYS).and_then(parse_release_date),
            cover_image_url: first_str(obj, COVER_KEYS).map(str::to_string),
            ..GameFields::default()
        };
        fields.ratings.community = self.ratings.map(store, payload);
        // Steam exports only an app id; its library art lives at a fixed CDN path.
        if fields.cover_image_url.is_none() && store == StoreId::Steam {
            if let Some(appid) = obj.get("appid").and_then(value_to_id) {
                fields.cover_image_url = Some(format!(
                    "https://cdn.cloudflare.steamstatic.com/steam/apps/{appid}/library_600x900_2x.jpg"
                ));
            }
        }
        fields
    }
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_set(v: Option<&Value>) -> IndexSet<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => IndexSet::new(),
    }
}

fn playtime_minutes(obj: &Map<String, Value>) -> Option<i64> {
    if let Some(m) = PLAYTIME_MINUTE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_f64))
    {
        return Some(m.round() as i64).filter(|m| *m >= 0);
    }
    if let Some(h) = obj.get("playtime_hours").and_then(Value::as_f64) {
        return Some((h * 60.0).round() as i64).filter(|m| *m >= 0);
    }
    obj.get("playtime")
        .and_then(Value::as_str)
        .and_then(parse_playtime_text)
}

/// Parse textual playtime such as "10 hours", "2 hours 30 minutes" or "45 min".
pub fn parse_playtime_text(raw: &str) -> Option<i64> {
    static HOURS: OnceLock<Option<Regex>> = OnceLock::new();
    static MINUTES: OnceLock<Option<Regex>> = OnceLock::new();
    let hours_re = HOURS
        .get_or_init(|| Regex::new(r"(?i)(\d+)\s*(?:hour|hr|h\b)").ok())
        .as_ref()?;
    let minutes_re = MINUTES.get_or_init(|| Regex::new(r"(?i)(\d+)\s*min").ok()).as_ref()?;
    let capture = |re: &Regex| -> i64 {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let total = capture(hours_re) * 60 + capture(minutes_re);
    (total > 0).then_some(total)
}

/// Timestamps arrive as unix seconds, RFC 3339, or plain dates depending on the store.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            if secs <= 0 {
                return None;
            }
            Utc.timestamp_opt(secs, 0).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        _ => None,
    }
}

/// Lenient release-date parsing: full dates, RFC 3339, "YYYY-MM" and bare years.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Some(d) = s.get(..10).and_then(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok()) {
        return Some(d);
    }
    let mut parts = s.splitn(2, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Stable id for stores that do not expose one: lowercase alphanumeric runs joined by '-'.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .replace(['\'', '’'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Public store page for an owned title, when the store has one.
pub fn derive_store_url(
    store: StoreId,
    store_game_id: Option<&str>,
    extra: &Map<String, Value>,
) -> Option<String> {
    match store {
        StoreId::Steam => store_game_id.map(|id| format!("https://store.steampowered.com/app/{id}")),
        StoreId::Epic => store_game_id.map(|id| format!("https://store.epicgames.com/en-US/p/{id}")),
        StoreId::Gog => store_game_id.map(|id| format!("https://www.gog.com/en/game/{id}")),
        StoreId::Xbox => store_game_id.map(|id| format!("https://www.xbox.com/games/store/{id}")),
        StoreId::Humble => extra
            .get("gamekey")
            .and_then(Value::as_str)
            .map(|key| format!("https://www.humblebundle.com/downloads?key={key}")),
        StoreId::Battlenet => Some("https://account.battle.net/games".to_string()),
        StoreId::Amazon => Some("https://gaming.amazon.com/home".to_string()),
        StoreId::Itch | StoreId::Ea | StoreId::Ubisoft | StoreId::Local => None,
    }
}

fn local_overrides(obj: &Map<String, Value>) -> Option<GameOverride> {
    if let Some(explicit) = obj.get("override").or_else(|| obj.get("overrides")) {
        return serde_json::from_value::<GameOverride>(explicit.clone())
            .ok()
            .filter(|o| !o.is_empty());
    }
    let igdb_id = obj.get("igdb_id").and_then(Value::as_i64).filter(|id| *id > 0)?;
    Some(GameOverride {
        igdb_id: Some(igdb_id),
        ..GameOverride::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::default()
    }

    #[test]
    fn steam_payload_maps_ids_playtime_and_cover() {
        let rec = normalizer()
            .normalize(
                StoreId::Steam,
                &json!({
                    "appid": 440,
                    "name": "Team Fortress 2",
                    "playtime_forever": 7260,
                    "rtime_last_played": 1_700_000_000,
                    "review_score": 93
                }),
            )
            .unwrap();
        assert_eq!(rec.store_game_id.as_deref(), Some("440"));
        assert_eq!(rec.title, "Team Fortress 2");
        assert_eq!(rec.playtime_minutes, Some(7260));
        assert_eq!(rec.last_played.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(
            rec.store_url.as_deref(),
            Some("https://store.steampowered.com/app/440")
        );
        assert_eq!(rec.native.ratings.community, Some(93.0));
        assert!(rec.native.cover_image_url.unwrap().contains("/440/"));
    }

    #[test]
    fn ubisoft_scrape_gets_slug_id_and_text_playtime() {
        let rec = normalizer()
            .normalize(
                StoreId::Ubisoft,
                &json!({"title": "Assassin's Creed Origins", "playtime": "12 hours 30 minutes", "lastPlayed": "2023-04-02"}),
            )
            .unwrap();
        assert_eq!(rec.store_game_id.as_deref(), Some("assassins-creed-origins"));
        assert_eq!(rec.playtime_minutes, Some(750));
        assert_eq!(rec.last_played.unwrap().date_naive().to_string(), "2023-04-02");
        assert!(rec.store_url.is_none());
    }

    #[test]
    fn slug_ids_ignore_edition_suffixes() {
        let id = |title: &str| {
            normalizer()
                .normalize(StoreId::Ubisoft, &json!({ "title": title }))
                .unwrap()
                .store_game_id
        };
        assert_eq!(id("Hollow Knight").as_deref(), Some("hollow-knight"));
        assert_eq!(id("Hollow Knight: Voidheart Edition"), id("Hollow Knight"));
        assert_eq!(id("Far Cry® 3 [PC]").as_deref(), Some("far-cry-3"));
    }

    #[test]
    fn humble_url_uses_gamekey() {
        let rec = normalizer()
            .normalize(
                StoreId::Humble,
                &json!({"machine_name": "celeste_storefront", "human_name": "Celeste", "gamekey": "abc123"}),
            )
            .unwrap();
        assert_eq!(rec.store_game_id.as_deref(), Some("celeste_storefront"));
        assert_eq!(
            rec.store_url.as_deref(),
            Some("https://www.humblebundle.com/downloads?key=abc123")
        );
    }

    #[test]
    fn local_payload_carries_overrides() {
        let rec = normalizer()
            .normalize(
                StoreId::Local,
                &json!({"store_id": "a1b2c3", "name": "doom_2016", "override": {"name": "DOOM", "igdb_id": 7351}}),
            )
            .unwrap();
        let ov = rec.overrides.unwrap();
        assert_eq!(ov.name.as_deref(), Some("DOOM"));
        assert_eq!(ov.igdb_id, Some(7351));
    }

    #[test]
    fn missing_title_is_validation_error() {
        let (records, rejected) = normalizer().normalize_batch(
            StoreId::Gog,
            &[json!({"id": 1, "title": "Gwent"}), json!({"id": 2}), json!({"id": 3, "title": "  "}), json!("x")],
        );
        assert_eq!(records.len(), 1);
        assert_eq!(rejected.len(), 3);
        assert!(rejected
            .iter()
            .all(|e| matches!(e, LibraryError::Validation { store: StoreId::Gog, .. })));
    }

    #[test]
    fn parses_playtime_text_variants() {
        assert_eq!(parse_playtime_text("10 hours"), Some(600));
        assert_eq!(parse_playtime_text("45 min"), Some(45));
        assert_eq!(parse_playtime_text("1 hour 5 minutes"), Some(65));
        assert_eq!(parse_playtime_text("never"), None);
    }

    #[test]
    fn parses_partial_release_dates() {
        assert_eq!(parse_release_date("2016-05-13").unwrap().to_string(), "2016-05-13");
        assert_eq!(parse_release_date("2016-05").unwrap().to_string(), "2016-05-01");
        assert_eq!(parse_release_date("2016").unwrap().to_string(), "2016-01-01");
        assert_eq!(
            parse_release_date("2016-05-13T00:00:00Z").unwrap().to_string(),
            "2016-05-13"
        );
        assert!(parse_release_date("soon").is_none());
    }

    #[test]
    fn slugify_matches_store_conventions() {
        assert_eq!(slugify("Tom Clancy's The Division 2"), "tom-clancys-the-division-2");
        assert_eq!(slugify("  "), "");
    }
}
