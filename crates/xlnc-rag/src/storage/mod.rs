//! SQLite persistence for pipeline records

mod database;

pub use database::{JobStats, RecordStore};
