pub mod api;
pub mod config;
pub mod database_ops;
pub mod discovery;
pub mod error;
pub mod matching;
pub mod merge;
pub mod model;
pub mod normalization;
pub mod tracing;
pub mod util {
    pub mod env;
}

pub use config::LibraryConfig;
pub use error::{LibraryError, LibraryResult};
