//! Storage errors.

use thiserror::Error;

use crate::store::Table;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{table} record {key:?} already exists")]
    Conflict { table: Table, key: String },
}
