// HTTP request handlers for API endpoints

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use tracing::{info, warn};

use crate::api::models::*;
use crate::api::server::AppState;
use crate::database_ops::worker_manager::SyncContext;
use crate::database_ops::{collections, enrich, games, import, ownership};
use crate::discovery::{self, LibraryStats};
use crate::error::LibraryError;
use crate::merge::EnrichMode;
use crate::model::{GameOverride, StoreId};

/// Maps the library error taxonomy onto HTTP statuses inside the standard envelope.
#[derive(Debug)]
pub struct ApiError(pub LibraryError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        Self(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self(err.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            LibraryError::NotFound { .. } | LibraryError::MetadataNotFound { .. } => StatusCode::NOT_FOUND,
            LibraryError::Validation { .. } | LibraryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LibraryError::Conflict { .. } | LibraryError::AmbiguousMatch { .. } => StatusCode::CONFLICT,
            LibraryError::Database(_) | LibraryError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(target = "api", error = %self.0, "request failed");
        }
        HttpResponse::build(status).json(ApiResponse::<()>::error(self.0.to_string()))
    }
}

pub type ApiResult = Result<HttpResponse, ApiError>;

fn ok<T: serde::Serialize>(data: T) -> ApiResult {
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

fn parse_store(raw: &str) -> Result<StoreId, ApiError> {
    raw.parse::<StoreId>()
        .map_err(|e| ApiError(LibraryError::invalid_input(e.to_string())))
}

fn parse_mode(raw: Option<&str>) -> Result<EnrichMode, ApiError> {
    raw.map(str::parse::<EnrichMode>)
        .transpose()
        .map(Option::unwrap_or_default)
        .map_err(|e| ApiError(LibraryError::invalid_input(e.to_string())))
}

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> ApiResult {
    let database = if state.db.ping().await { "connected" } else { "disconnected" };
    ok(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn list_library(state: web::Data<AppState>, params: web::Query<LibraryParams>) -> ApiResult {
    let query = params.into_inner().into_query()?;
    let entries = games::load_library(&state.db).await?;
    ok(query.apply(entries))
}

pub async fn get_game(state: web::Data<AppState>, path: web::Path<i64>) -> ApiResult {
    ok(games::load_entry(&state.db, path.into_inner()).await?)
}

pub async fn set_hidden(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<HideRequest>,
) -> ApiResult {
    let game_id = path.into_inner();
    games::set_hidden(&state.db, game_id, body.hidden).await?;
    ok(games::load_entry(&state.db, game_id).await?)
}

pub async fn set_nsfw(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<NsfwRequest>,
) -> ApiResult {
    let game = games::set_nsfw(&state.db, path.into_inner(), body.nsfw).await?;
    ok(games::load_entry(&state.db, game.id).await?)
}

/// Link a game to an IGDB id by hand, or unlink it with a null id.
pub async fn set_igdb(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<IgdbRequest>,
) -> ApiResult {
    let game_id = path.into_inner();
    let game = match body.igdb_id {
        None => games::clear_igdb(&state.db, game_id).await?,
        Some(id) if id <= 0 => {
            return Err(LibraryError::invalid_input(format!("igdb_id must be positive, got {id}")).into());
        }
        Some(id) => {
            let ov = GameOverride {
                igdb_id: Some(id),
                ..GameOverride::default()
            };
            games::set_override(&state.db, game_id, &ov).await?
        }
    };
    ok(games::load_entry(&state.db, game.id).await?)
}

pub async fn bulk_hide(state: web::Data<AppState>, body: web::Json<BulkFlagRequest>) -> ApiResult {
    let updated = games::set_hidden_many(&state.db, &body.game_ids, body.value).await?;
    ok(BulkUpdateResponse { updated })
}

pub async fn bulk_nsfw(state: web::Data<AppState>, body: web::Json<BulkFlagRequest>) -> ApiResult {
    let updated = games::set_nsfw_many(&state.db, &body.game_ids, body.value).await?;
    ok(BulkUpdateResponse { updated })
}

pub async fn set_override(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<GameOverride>,
) -> ApiResult {
    let game = games::set_override(&state.db, path.into_inner(), &body).await?;
    ok(games::load_entry(&state.db, game.id).await?)
}

pub async fn remove_ownership(state: web::Data<AppState>, path: web::Path<(i64, String)>) -> ApiResult {
    let (game_id, store) = path.into_inner();
    let store = parse_store(&store)?;
    ok(ownership::remove(&state.db, game_id, store).await?)
}

pub async fn game_collections(state: web::Data<AppState>, path: web::Path<i64>) -> ApiResult {
    ok(collections::collections_for_game(&state.db, path.into_inner()).await?)
}

/// Enrich one game now, whatever its completeness. Needs a configured metadata service.
pub async fn enrich_game(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: Option<web::Json<EnrichRequest>>,
) -> ApiResult {
    let service = state.metadata_service()?;
    let mode = parse_mode(body.as_ref().and_then(|b| b.mode.as_deref()))?;
    let game = enrich::enrich_game(&state.db, &state.resolver, service.as_ref(), path.into_inner(), mode).await?;
    ok(games::load_entry(&state.db, game.id).await?)
}

pub async fn import_store(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ImportRequest>,
) -> ApiResult {
    let store = parse_store(&path.into_inner())?;
    let mut ctx = SyncContext::new(Some(store));
    info!(target = "api", run_id = %ctx.run_id, store = %store, records = body.games.len(), "import requested");
    let summary = import::import_payloads(
        &state.db,
        &state.matcher,
        &state.normalizer,
        &mut ctx,
        store,
        &body.games,
    )
    .await;
    ok(summary)
}

pub async fn run_enrichment(state: web::Data<AppState>, body: Option<web::Json<EnrichRequest>>) -> ApiResult {
    let service = state.metadata_service()?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let mode = parse_mode(request.mode.as_deref())?;
    let summary = enrich::enrich_library(&state.db, &state.resolver, service.as_ref(), mode, request.limit).await?;
    ok(summary)
}

pub async fn discover(state: web::Data<AppState>) -> ApiResult {
    let entries = games::load_library(&state.db).await?;
    ok(discovery::sections(&entries, &state.config.discovery))
}

/// A uniformly random visible game, drawn fresh on every request.
pub async fn random_game(state: web::Data<AppState>) -> ApiResult {
    let entries = games::load_library(&state.db).await?;
    let pick = discovery::random_pick(&entries, &mut rand::thread_rng()).cloned();
    match pick {
        Some(entry) => ok(entry),
        None => Err(ApiError(LibraryError::not_found("game", "random"))),
    }
}

pub async fn stats(state: web::Data<AppState>) -> ApiResult {
    let entries = games::load_library(&state.db).await?;
    ok(LibraryStats::from_entries(&entries))
}

pub async fn list_collections(state: web::Data<AppState>) -> ApiResult {
    ok(collections::list(&state.db).await?)
}

pub async fn create_collection(
    state: web::Data<AppState>,
    body: web::Json<collections::NewCollection>,
) -> ApiResult {
    let created = collections::create(&state.db, &body).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(created)))
}

pub async fn get_collection(state: web::Data<AppState>, path: web::Path<i64>) -> ApiResult {
    ok(collections::get(&state.db, path.into_inner()).await?)
}

pub async fn update_collection(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<collections::CollectionPatch>,
) -> ApiResult {
    ok(collections::update(&state.db, path.into_inner(), &body).await?)
}

pub async fn delete_collection(state: web::Data<AppState>, path: web::Path<i64>) -> ApiResult {
    let id = path.into_inner();
    collections::delete(&state.db, id).await?;
    ok(serde_json::json!({ "deleted": id }))
}

pub async fn add_collection_game(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<AddGameRequest>,
) -> ApiResult {
    ok(collections::add_game(&state.db, path.into_inner(), body.game_id).await?)
}

pub async fn remove_collection_game(state: web::Data<AppState>, path: web::Path<(i64, i64)>) -> ApiResult {
    let (collection_id, game_id) = path.into_inner();
    ok(collections::remove_game(&state.db, collection_id, game_id).await?)
}

pub async fn reorder_collection(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<ReorderRequest>,
) -> ApiResult {
    ok(collections::reorder(&state.db, path.into_inner(), &body.game_ids).await?)
}
