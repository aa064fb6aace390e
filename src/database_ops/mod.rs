pub mod collections;
pub mod db;
pub mod enrich;
pub mod export;
pub mod games;
pub mod igdb;
pub mod import;
pub mod local;
pub mod ownership;
pub mod worker_manager;
