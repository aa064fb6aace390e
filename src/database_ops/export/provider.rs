//! Ownership exports written by store CLIs or the browser bookmarklet.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::database_ops::worker_manager::StoreSyncProvider;
use crate::model::{RawOwnershipRecord, StoreId};
use crate::normalization::record::RecordNormalizer;

/// Reads a JSON export (a bare array, or an object with a `games` array) for one store.
#[derive(Debug, Clone)]
pub struct ExportFileProvider {
    store: StoreId,
    path: PathBuf,
    normalizer: RecordNormalizer,
}

impl ExportFileProvider {
    pub fn new(store: StoreId, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
            normalizer: RecordNormalizer::default(),
        }
    }
}

/// The game entries of an export payload.
pub fn export_entries(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("games") {
            Some(Value::Array(items)) => Ok(items),
            _ => bail!("export object has no `games` array"),
        },
        _ => bail!("export must be a JSON array or an object with a `games` array"),
    }
}

#[async_trait::async_trait]
impl StoreSyncProvider for ExportFileProvider {
    fn store(&self) -> StoreId {
        self.store
    }

    async fn sync(&self) -> Result<Vec<RawOwnershipRecord>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading export {}", self.path.display()))?;
        let payload: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing export {}", self.path.display()))?;
        let entries = export_entries(payload)?;
        let (records, rejected) = self.normalizer.normalize_batch(self.store, &entries);
        for err in &rejected {
            warn!(target = "sync", store = %self.store, error = %err, "skipping invalid export entry");
        }
        info!(
            target = "sync",
            store = %self.store,
            path = %self.path.display(),
            records = records.len(),
            rejected = rejected.len(),
            "read store export"
        );
        Ok(records)
    }
}
