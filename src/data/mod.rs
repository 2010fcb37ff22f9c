//! Data ingestion and storage
//!
//! Scrapers for results pages, CSV export and SQLite storage.

pub mod database;
pub mod export;
pub mod scrapers;

pub use database::Database;
