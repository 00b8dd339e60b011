#![forbid(unsafe_code)]

pub mod memory_cli;
pub mod tx_cli;
