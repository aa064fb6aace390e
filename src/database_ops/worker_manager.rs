use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::database_ops::db::Db;
use crate::database_ops::games;
use crate::database_ops::import::{import_batch, ImportSummary};
use crate::matching::{IdentityMatcher, LibraryIndex};
use crate::model::{RawOwnershipRecord, StoreId};

/// A store integration: produces the raw ownership records for one store.
#[async_trait::async_trait]
pub trait StoreSyncProvider: Send + Sync {
    fn store(&self) -> StoreId;
    async fn sync(&self) -> Result<Vec<RawOwnershipRecord>>;
}

/// Per-run state threaded through the import unit: the run id for log
/// correlation, the cached match index and the running summary.
pub struct SyncContext {
    pub run_id: Uuid,
    pub store: Option<StoreId>,
    pub started_at: DateTime<Utc>,
    pub summary: ImportSummary,
    index: Option<LibraryIndex>,
}

impl SyncContext {
    pub fn new(store: Option<StoreId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            store,
            started_at: Utc::now(),
            summary: ImportSummary::default(),
            index: None,
        }
    }

    /// The cached index, loading a fresh snapshot if there is none.
    pub async fn index(&mut self, db: &Db) -> sqlx::Result<&mut LibraryIndex> {
        if self.index.is_none() {
            self.index = Some(games::load_index(db).await?);
        }
        Ok(self.index.get_or_insert_with(LibraryIndex::default))
    }

    pub fn cached_index_mut(&mut self) -> Option<&mut LibraryIndex> {
        self.index.as_mut()
    }

    pub fn invalidate_index(&mut self) {
        self.index = None;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub store: StoreId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ImportSummary,
    /// Set when the provider itself failed; nothing was imported for the store then.
    pub error: Option<String>,
}

impl SyncReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.summary.failed == 0
    }
}

pub struct SyncRunner {
    db: Db,
    matcher: Arc<IdentityMatcher>,
}

impl SyncRunner {
    pub fn new(db: Db, matcher: IdentityMatcher) -> Self {
        Self {
            db,
            matcher: Arc::new(matcher),
        }
    }

    /// Sync one store: fetch its records, then import them one atomic unit at a time.
    pub async fn run_one(&self, provider: &dyn StoreSyncProvider) -> SyncReport {
        run_provider(&self.db, &self.matcher, provider).await
    }

    /// Run every provider concurrently. A failing store never aborts the
    /// others; each gets its own report.
    pub async fn run_all(&self, providers: Vec<Box<dyn StoreSyncProvider>>) -> Vec<SyncReport> {
        let mut tasks = Vec::with_capacity(providers.len());
        for provider in providers {
            let db = self.db.clone();
            let matcher = Arc::clone(&self.matcher);
            let store = provider.store();
            tasks.push((
                store,
                tokio::spawn(async move { run_provider(&db, &matcher, provider.as_ref()).await }),
            ));
        }
        let (stores, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(handles).await;
        stores
            .into_iter()
            .zip(results)
            .map(|(store, res)| match res {
                Ok(report) => report,
                Err(join_err) => {
                    error!(target = "sync", store = %store, error = %join_err, "sync task panicked");
                    let now = Utc::now();
                    SyncReport {
                        run_id: Uuid::nil(),
                        store,
                        started_at: now,
                        finished_at: now,
                        summary: ImportSummary::default(),
                        error: Some(join_err.to_string()),
                    }
                }
            })
            .collect()
    }
}

async fn run_provider(db: &Db, matcher: &IdentityMatcher, provider: &dyn StoreSyncProvider) -> SyncReport {
    let store = provider.store();
    let mut ctx = SyncContext::new(Some(store));
    let span = info_span!("sync", run_id = %ctx.run_id, store = %store);
    async {
        info!(target = "sync", "starting store sync");
        let error = match provider.sync().await {
            Ok(records) => {
                info!(target = "sync", fetched = records.len(), "fetched ownership records");
                import_batch(db, matcher, &mut ctx, records).await;
                None
            }
            Err(e) => {
                error!(target = "sync", error = %e, "store provider failed");
                Some(format!("{e:#}"))
            }
        };
        let s = &ctx.summary;
        info!(
            target = "sync",
            processed = s.processed,
            created = s.created,
            matched = s.matched,
            skipped = s.skipped,
            ambiguous = s.ambiguous,
            failed = s.failed,
            "store sync finished"
        );
        SyncReport {
            run_id: ctx.run_id,
            store,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            summary: ctx.summary.clone(),
            error,
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        store: StoreId,
        titles: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl StoreSyncProvider for FixedProvider {
        fn store(&self) -> StoreId {
            self.store
        }
        async fn sync(&self) -> Result<Vec<RawOwnershipRecord>> {
            Ok(self
                .titles
                .iter()
                .map(|t| RawOwnershipRecord::new(self.store, *t))
                .collect())
        }
    }

    struct BrokenProvider;

    #[async_trait::async_trait]
    impl StoreSyncProvider for BrokenProvider {
        fn store(&self) -> StoreId {
            StoreId::Itch
        }
        async fn sync(&self) -> Result<Vec<RawOwnershipRecord>> {
            anyhow::bail!("itch.io api key rejected")
        }
    }

    #[tokio::test]
    async fn failing_provider_does_not_stop_the_others() {
        let db = Db::connect_memory().await.unwrap();
        let runner = SyncRunner::new(db.clone(), IdentityMatcher::default());
        let reports = runner
            .run_all(vec![
                Box::new(FixedProvider {
                    store: StoreId::Gog,
                    titles: vec!["Hollow Knight", "Celeste"],
                }) as Box<dyn StoreSyncProvider>,
                Box::new(BrokenProvider),
            ])
            .await;
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_ok());
        assert_eq!(reports[0].summary.created, 2);
        assert!(reports[1].error.as_deref().unwrap().contains("rejected"));
        assert_eq!(games::list(&db.pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn context_reuses_cached_index() {
        let db = Db::connect_memory().await.unwrap();
        let mut ctx = SyncContext::new(None);
        assert!(ctx.cached_index_mut().is_none());
        assert_eq!(ctx.index(&db).await.unwrap().generation(), 0);
        ctx.cached_index_mut().unwrap().set_generation(7);
        assert_eq!(ctx.index(&db).await.unwrap().generation(), 7);
        ctx.invalidate_index();
        assert_eq!(ctx.index(&db).await.unwrap().generation(), 0);
    }
}
