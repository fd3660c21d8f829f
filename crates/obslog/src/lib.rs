//! obslog - the collection catalog and tech-obs log.
//!
//! Collections describe a study protocol: an ordered list of tasks and the
//! devices each one needs. The tech-obs log holds one row per recorded task.
//! Rows are allocated before a task starts and filled exactly once after it
//! finishes.

pub mod db;
pub mod seed;

pub use db::ObsLogDb;
pub use seed::{load_seed_file, SeedFile};

use boothproto::LogRowId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObsLogError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unknown log row: {0}")]
    UnknownRow(LogRowId),

    #[error("log row {0} was already written")]
    RowAlreadyWritten(LogRowId),

    #[error("corrupt catalog entry: {0}")]
    Corrupt(String),

    #[error("invalid seed file: {0}")]
    Seed(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ObsLogError>;
