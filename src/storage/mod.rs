//! Storage layer for catalogs and work-order workflow data.

mod models;
mod sqlite;

pub use models::*;
pub use sqlite::SqliteStorage;
