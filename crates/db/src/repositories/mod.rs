use thiserror::Error;

use pocketbook_core::records::StoreError;

pub mod memory;
pub mod record;

pub use memory::InMemoryRecordStore;
pub use record::SqlRecordStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError::Unavailable(value.to_string())
    }
}
