// API server implementation using actix-web

use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

use crate::api::handlers::ApiError;
use crate::api::{auth, middleware, routes};
use crate::config::LibraryConfig;
use crate::database_ops::db::Db;
use crate::error::LibraryError;
use crate::matching::IdentityMatcher;
use crate::merge::{MetadataResolver, MetadataService};
use crate::normalization::record::RecordNormalizer;
use crate::util::env::env_opt;

/// Shared, read-only state handed to every handler.
pub struct AppState {
    pub db: Db,
    pub config: LibraryConfig,
    pub matcher: IdentityMatcher,
    pub resolver: MetadataResolver,
    pub normalizer: RecordNormalizer,
    pub metadata: Option<Arc<dyn MetadataService>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Db, config: LibraryConfig, metadata: Option<Arc<dyn MetadataService>>) -> Self {
        Self {
            matcher: config.matcher(),
            resolver: config.resolver(),
            normalizer: RecordNormalizer::default(),
            db,
            config,
            metadata,
            started_at: Instant::now(),
        }
    }

    pub fn metadata_service(&self) -> Result<Arc<dyn MetadataService>, ApiError> {
        self.metadata.clone().ok_or_else(|| {
            ApiError(LibraryError::invalid_input(
                "no metadata service configured (set TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET)",
            ))
        })
    }
}

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    /// Bearer token required on mutating routes; none leaves them open (local use).
    pub api_secret: Option<String>,
    pub allowed_origins: String,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = env_opt("API_PORT")
            .map(|raw| raw.parse())
            .transpose()
            .context("Invalid API_PORT")?
            .unwrap_or(8080);
        let api_secret = env_opt("API_SECRET");
        if api_secret.is_none() {
            tracing::warn!(target = "api", "API_SECRET not set; mutating routes are unauthenticated");
        }
        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:8080".to_string());

        Ok(Self {
            host,
            port,
            api_secret,
            allowed_origins,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, state: AppState) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            target = "api",
            host = %self.host,
            port = %self.port,
            metadata = state.metadata.is_some(),
            "Starting backlogia API server"
        );

        let state = web::Data::new(state);
        let api_secret = self.api_secret.clone();
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(api_secret.clone());

            App::new()
                .app_data(state.clone())
                .app_data(middleware::json_config())
                .wrap(auth)
                .wrap(cors)
                .wrap(compress)
                .wrap(logger)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
