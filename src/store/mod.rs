//! Persistence: the content-addressed file store and the dedup catalogue

pub mod catalogue;
pub mod content;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use catalogue::Catalogue;
pub use content::{ContentStore, IngestedFile};
pub use postgres::PostgresCatalogue;
pub use sqlite::SqliteCatalogue;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Message(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
