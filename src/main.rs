use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use backlogia::database_ops::db::Db;
use backlogia::database_ops::enrich;
use backlogia::database_ops::export::ExportFileProvider;
use backlogia::database_ops::games;
use backlogia::database_ops::igdb::IgdbClient;
use backlogia::database_ops::local::LocalFolderProvider;
use backlogia::database_ops::worker_manager::{StoreSyncProvider, SyncReport, SyncRunner};
use backlogia::discovery::{self, LibraryQuery, LibraryStats, SortField};
use backlogia::merge::EnrichMode;
use backlogia::model::StoreId;
use backlogia::LibraryConfig;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "backlogia", version, about = "Unified multi-store game library")]
struct Cli {
    /// Override the library database (path or sqlite:// URL)
    #[arg(long, global = true, env = "LIBRARY_DB")]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Create or upgrade the library schema
    Migrate,
    /// Import one store's JSON export (array, or object with a `games` array)
    Import {
        /// Store the export comes from (steam, gog, epic, itch, humble, ...)
        store: StoreId,
        file: PathBuf,
    },
    /// Sync local folders and any number of store exports concurrently
    Sync {
        /// Local library roots (defaults to LOCAL_GAMES_PATHS)
        #[arg(long = "local", value_delimiter = ',')]
        local_roots: Vec<PathBuf>,
        /// Store exports as `store=path`, repeatable
        #[arg(long = "export", value_parser = parse_export)]
        exports: Vec<(StoreId, PathBuf)>,
    },
    /// Fetch IGDB metadata (needs TWITCH_CLIENT_ID / TWITCH_CLIENT_SECRET)
    Enrich {
        /// missing | all
        #[arg(long, default_value = "missing")]
        mode: EnrichMode,
        /// Maximum games to look up this run (defaults to ENRICH_LIMIT)
        #[arg(long)]
        limit: Option<usize>,
        /// Enrich a single game id, whatever its completeness
        #[arg(long)]
        game: Option<i64>,
    },
    /// Print the filtered, sorted library as JSON
    List {
        #[arg(long, value_delimiter = ',')]
        store: Vec<StoreId>,
        #[arg(long, value_delimiter = ',')]
        genre: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "name")]
        sort: SortField,
        #[arg(long, default_value_t = false)]
        desc: bool,
        #[arg(long, default_value_t = false)]
        include_hidden: bool,
    },
    /// Print the discovery sections as JSON
    Discover,
    /// Print library statistics as JSON
    Stats,
}

fn parse_export(raw: &str) -> Result<(StoreId, PathBuf)> {
    let Some((store, path)) = raw.split_once('=') else {
        bail!("expected store=path, got {raw:?}");
    };
    Ok((store.parse()?, PathBuf::from(path)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_report(report: &SyncReport) {
    let s = &report.summary;
    match &report.error {
        Some(err) => warn!(store = %report.store, run_id = %report.run_id, error = %err, "sync failed"),
        None => info!(
            store = %report.store,
            run_id = %report.run_id,
            processed = s.processed,
            created = s.created,
            matched = s.matched,
            skipped = s.skipped,
            ambiguous = s.ambiguous,
            failed = s.failed,
            "sync finished"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    backlogia::tracing::init_tracing(backlogia::tracing::DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let mut config = LibraryConfig::from_env()?;
    if let Some(db) = cli.db {
        config.database_url = if db.starts_with("sqlite:") { db } else { format!("sqlite://{db}") };
    }
    let db = Db::connect(&config.database_url, config.db_max_connections).await?;

    match cli.command {
        Commands::Migrate => {
            db.migrate().await?;
            info!("library schema is up to date");
        }
        Commands::Import { store, file } => {
            let runner = SyncRunner::new(db, config.matcher());
            let report = runner.run_one(&ExportFileProvider::new(store, file)).await;
            log_report(&report);
            print_json(&report)?;
            if let Some(err) = report.error {
                bail!("import failed: {err}");
            }
        }
        Commands::Sync { local_roots, exports } => {
            let roots = if local_roots.is_empty() { config.local_roots.clone() } else { local_roots };
            let mut providers: Vec<Box<dyn StoreSyncProvider>> = Vec::new();
            if !roots.is_empty() {
                providers.push(Box::new(LocalFolderProvider::new(roots)));
            }
            for (store, path) in exports {
                providers.push(Box::new(ExportFileProvider::new(store, path)));
            }
            if providers.is_empty() {
                bail!("nothing to sync: pass --local/--export or set LOCAL_GAMES_PATHS");
            }
            let reports = SyncRunner::new(db, config.matcher()).run_all(providers).await;
            reports.iter().for_each(log_report);
            print_json(&reports)?;
        }
        Commands::Enrich { mode, limit, game } => {
            let client = IgdbClient::new_from_env().context("IGDB client")?;
            let resolver = config.resolver();
            match game {
                Some(id) => {
                    let game = enrich::enrich_game(&db, &resolver, &client, id, mode).await?;
                    print_json(&game)?;
                }
                None => {
                    let summary = enrich::enrich_library(&db, &resolver, &client, mode, limit).await?;
                    print_json(&summary)?;
                }
            }
        }
        Commands::List { store, genre, search, sort, desc, include_hidden } => {
            let query = LibraryQuery {
                stores: store,
                genres: genre,
                search,
                sort,
                descending: desc,
                include_hidden,
            };
            let entries = query.apply(games::load_library(&db).await?);
            print_json(&entries)?;
        }
        Commands::Discover => {
            let entries = games::load_library(&db).await?;
            print_json(&discovery::sections(&entries, &config.discovery))?;
        }
        Commands::Stats => {
            let entries = games::load_library(&db).await?;
            print_json(&LibraryStats::from_entries(&entries))?;
        }
    }

    Ok(())
}
