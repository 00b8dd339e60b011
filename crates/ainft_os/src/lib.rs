#![forbid(unsafe_code)]

pub mod authorization;
pub mod config;
pub mod error;
pub mod http;
pub mod memory_flow;
pub mod session;

pub use config::StorageConfig;
pub use error::MemoryError;
pub use session::{IdentityGateway, Session};
