use thiserror::Error;

use crate::model::StoreId;

pub type LibraryResult<T> = std::result::Result<T, LibraryError>;

/// Failure taxonomy of the reconciliation core.
///
/// Every variant is scoped to one record or one game; callers running a batch
/// count them and move on.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Raw record rejected before identity resolution (e.g. blank title).
    #[error("invalid {store} record: {reason}")]
    Validation { store: StoreId, reason: String },

    /// Two candidates scored within the ambiguity margin of each other.
    #[error("ambiguous title match for {title:?}: game {first} ({first_score:.3}) vs game {second} ({second_score:.3})")]
    AmbiguousMatch {
        title: String,
        first: i64,
        first_score: f64,
        second: i64,
        second_score: f64,
    },

    #[error("no confident metadata match for game {game_id} ({title:?})")]
    MetadataNotFound { game_id: i64, title: String },

    /// Concurrent writers kept colliding past the retry budget.
    #[error("write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// A user request that cannot be applied as given.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LibraryError {
    pub fn validation(store: StoreId, reason: impl Into<String>) -> Self {
        Self::Validation {
            store,
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// SQLite busy/locked/stale-snapshot errors and unique violations raised by a
    /// racing writer. The atomic import unit retries these against fresh state.
    pub fn is_retryable(&self) -> bool {
        let Self::Database(sqlx::Error::Database(db_err)) = self else {
            return false;
        };
        if db_err.is_unique_violation() {
            return true;
        }
        match db_err.code().as_deref() {
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT, SQLITE_LOCKED_SHAREDCACHE
            Some("5") | Some("6") | Some("517") | Some("262") => true,
            _ => {
                let msg = db_err.message().to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
        }
    }
}
