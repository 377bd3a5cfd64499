pub mod config;
pub mod errors;
pub mod records;

pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use records::{
    RecordAction, RecordKey, RecordStore, ResilientRecordStore, StoreError, StorePolicy,
};
