//! Persistence layer: tenant-scoped processed-log records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlRecordStore;
pub use traits::{ProcessedRecord, RecordKey, RecordStore, StoredRecord};
