use thiserror::Error;

use crate::{
    page::{BlockId, RecordId},
    parser::ParserError,
    storage::StorageError,
};

pub type Result<T> = std::result::Result<T, DbError>;

/// Errors raised by the heap storage engine and the layers built on top of it
#[derive(Debug, Error)]
pub enum DbError {
    /// The block cannot hold the requested bytes. Recovered inside the heap table by
    /// moving on to a fresh block.
    #[error("not enough room in block {block_id} for {needed} bytes")]
    NoRoom { block_id: BlockId, needed: usize },

    #[error("no live record {record_id} in block {block_id}")]
    NoSuchRecord {
        block_id: BlockId,
        record_id: RecordId,
    },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Parse(#[from] ParserError),
}

impl DbError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        DbError::SchemaViolation(message.into())
    }

    pub fn is_no_room(&self) -> bool {
        matches!(self, DbError::NoRoom { .. })
    }

    pub fn is_schema_violation(&self) -> bool {
        matches!(self, DbError::SchemaViolation(_))
    }
}
