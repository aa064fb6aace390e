// HTTP API server binary for backlogia

use std::sync::Arc;

use anyhow::Result;
use backlogia::api::{ApiServer, AppState};
use backlogia::database_ops::db::Db;
use backlogia::database_ops::igdb::IgdbClient;
use backlogia::merge::MetadataService;
use backlogia::util::env as env_util;
use backlogia::LibraryConfig;

#[actix_web::main]
async fn main() -> Result<()> {
    backlogia::tracing::init_tracing(backlogia::tracing::DEFAULT_FILTER)?;
    tracing::info!("Initializing backlogia API server");

    env_util::preflight_check(
        "api_server",
        &[],
        &["DATABASE_URL", "API_HOST", "API_PORT", "API_SECRET", "TWITCH_CLIENT_ID"],
    )?;

    let config = LibraryConfig::from_env()?;
    let server = ApiServer::from_env()?;

    let db = Db::connect(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connected successfully");

    // Enrichment routes answer 400 until IGDB credentials are provided.
    let metadata: Option<Arc<dyn MetadataService>> = match IgdbClient::new_from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "IGDB disabled");
            None
        }
    };

    server.run(AppState::new(db, config, metadata)).await?;

    Ok(())
}
