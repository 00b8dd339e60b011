#![forbid(unsafe_code)]

pub mod document;
pub mod file_backend;
pub mod memory_backend;
pub mod record_store;

pub use record_store::{RecordBackend, StorageError, VersionedRecordStore};
