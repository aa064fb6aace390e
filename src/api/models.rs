// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::discovery::{LibraryQuery, SortField};
use crate::error::{LibraryError, LibraryResult};
use crate::model::StoreId;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// Query string of the library listing. `store` and `genre` take comma-separated lists.
#[derive(Debug, Default, Deserialize)]
pub struct LibraryParams {
    pub store: Option<String>,
    pub genre: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    /// `asc` (default) or `desc`.
    pub order: Option<String>,
    #[serde(default)]
    pub include_hidden: bool,
}

fn csv(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl LibraryParams {
    pub fn into_query(self) -> LibraryResult<LibraryQuery> {
        let stores = csv(self.store.as_deref())
            .map(|s| s.parse::<StoreId>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LibraryError::invalid_input(e.to_string()))?;
        let sort = match self.sort.as_deref() {
            Some(raw) => raw
                .parse::<SortField>()
                .map_err(|e| LibraryError::invalid_input(e.to_string()))?,
            None => SortField::default(),
        };
        let descending = match self.order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => return Err(LibraryError::invalid_input(format!("unknown order {other:?}"))),
        };
        Ok(LibraryQuery {
            stores,
            genres: csv(self.genre.as_deref()).map(str::to_string).collect(),
            search: self.search,
            sort,
            descending,
            include_hidden: self.include_hidden,
        })
    }
}

/// Batch import of raw store payloads, as posted by scheduled syncs and the bookmarklet.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub games: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct HideRequest {
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct NsfwRequest {
    pub nsfw: bool,
}

/// A null (or absent) `igdb_id` unlinks the game from IGDB.
#[derive(Debug, Deserialize)]
pub struct IgdbRequest {
    #[serde(default)]
    pub igdb_id: Option<i64>,
}

fn flag_on() -> bool {
    true
}

/// Bulk flag update. The flag defaults to set, so `{"game_ids": [..]}` alone hides (or flags).
#[derive(Debug, Deserialize)]
pub struct BulkFlagRequest {
    pub game_ids: Vec<i64>,
    #[serde(default = "flag_on", alias = "hidden", alias = "nsfw")]
    pub value: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkUpdateResponse {
    pub updated: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrichRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AddGameRequest {
    pub game_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub game_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_params_build_query() {
        let q = LibraryParams {
            store: Some("steam, gog".into()),
            genre: Some("RPG".into()),
            sort: Some("playtime".into()),
            order: Some("DESC".into()),
            ..Default::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.stores, vec![StoreId::Steam, StoreId::Gog]);
        assert_eq!(q.genres, vec!["RPG"]);
        assert_eq!(q.sort, SortField::Playtime);
        assert!(q.descending);
    }

    #[test]
    fn bad_params_are_invalid_input() {
        let err = LibraryParams {
            sort: Some("vibes".into()),
            ..Default::default()
        }
        .into_query()
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput(_)));
    }
}
