//! Local library folders: every non-hidden sub-folder of a configured root is a game.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Map};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::database_ops::worker_manager::StoreSyncProvider;
use crate::model::{GameOverride, RawOwnershipRecord, StoreId};

const OVERRIDE_FILE: &str = "game.json";

#[derive(Debug, Clone)]
pub struct LocalFolderProvider {
    roots: Vec<PathBuf>,
}

impl LocalFolderProvider {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

#[async_trait::async_trait]
impl StoreSyncProvider for LocalFolderProvider {
    fn store(&self) -> StoreId {
        StoreId::Local
    }

    async fn sync(&self) -> Result<Vec<RawOwnershipRecord>> {
        let roots = self.roots.clone();
        tokio::task::spawn_blocking(move || scan_roots(&roots))
            .await
            .context("local folder scan panicked")?
    }
}

/// Stable store id of a game folder: first 12 hex chars of SHA-256 over
/// `<root folder name>/<game folder name>`, so moving the whole root keeps ids.
pub fn folder_store_id(root: &Path, folder_name: &str) -> String {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{root_name}/{folder_name}").as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

fn read_override(dir: &Path) -> Option<GameOverride> {
    let path = dir.join(OVERRIDE_FILE);
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<GameOverride>(&raw) {
        Ok(ov) if !ov.is_empty() => Some(ov),
        Ok(_) => None,
        Err(e) => {
            warn!(target = "local", path = %path.display(), error = %e, "ignoring unreadable game.json");
            None
        }
    }
}

/// Scan each root one level deep. Missing or unreadable roots are skipped with a warning.
pub fn scan_roots(roots: &[PathBuf]) -> Result<Vec<RawOwnershipRecord>> {
    let mut records = Vec::new();
    for root in roots {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target = "local", root = %root.display(), error = %e, "skipping unreadable library root");
                continue;
            }
        };
        let mut found = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let folder_name = entry.file_name().to_string_lossy().into_owned();
            if folder_name.starts_with('.') {
                continue;
            }
            let mut extra = Map::new();
            extra.insert("folder_path".into(), json!(path.display().to_string()));

            let mut record = RawOwnershipRecord::new(StoreId::Local, folder_name.as_str())
                .with_store_game_id(folder_store_id(root, &folder_name));
            record.extra = extra;
            if let Some(ov) = read_override(&path) {
                debug!(target = "local", folder = %folder_name, "applying game.json override");
                record = record.with_overrides(ov);
            }
            records.push(record);
            found += 1;
        }
        info!(target = "local", root = %root.display(), games = found, "scanned local library root");
    }
    records.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(records)
}
