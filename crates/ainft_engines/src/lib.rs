#![forbid(unsafe_code)]

pub mod key_derivation;
pub mod loopback;
pub mod memory_cipher;
pub mod transaction_signer;
