#![forbid(unsafe_code)]

pub mod common;
pub mod gateway;
pub mod memory_record;
pub mod storage_uri;
pub mod transition;

pub use common::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};
