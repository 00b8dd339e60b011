#![forbid(unsafe_code)]

use ainft_contracts::storage_uri::UnknownSchemeError;
use ainft_contracts::ContractViolation;
use ainft_engines::key_derivation::KeyDerivationError;
use ainft_engines::memory_cipher::CipherError;
use ainft_engines::transaction_signer::{NetworkFailure, SignerError};
use ainft_storage::StorageError;
use thiserror::Error;

use crate::memory_flow::PendingBroadcast;

/// Failure surfaced by the memory flows.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("signature authentication failed: {0}")]
    AuthenticationFailure(SignerError),
    /// The record is corrupted or tampered: AEAD rejection or hash mismatch.
    #[error("memory integrity check failed: {0}")]
    IntegrityFailure(CipherError),
    #[error("network failure: {message}")]
    NetworkFailure {
        message: String,
        diagnostic: Option<String>,
    },
    /// The record is durable at `pending.version`; only the broadcast failed.
    /// Re-send `pending` instead of writing again.
    #[error("memory committed at version {} but broadcast failed: {failure}", .pending.version)]
    BroadcastFailed {
        pending: Box<PendingBroadcast>,
        failure: NetworkFailure,
    },
    #[error("version conflict on {resource_id}: expected prior {expected:?}, found {found:?}")]
    VersionConflict {
        resource_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error(transparent)]
    UnknownScheme(#[from] UnknownSchemeError),
    #[error("key derivation failed: {0}")]
    KeyDerivation(#[from] KeyDerivationError),
    #[error("contract violation: {0:?}")]
    Contract(ContractViolation),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("no memory stored for {resource_id}")]
    NotFound { resource_id: String },
    #[error("storage authorization expired at {expiry_ms}")]
    AuthorizationExpired { expiry_ms: u64 },
}

impl MemoryError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, MemoryError::VersionConflict { .. })
    }

    /// The committed write whose broadcast is still outstanding, if any.
    pub fn pending_broadcast(&self) -> Option<&PendingBroadcast> {
        match self {
            MemoryError::BroadcastFailed { pending, .. } => Some(pending),
            _ => None,
        }
    }
}

impl From<ContractViolation> for MemoryError {
    fn from(v: ContractViolation) -> Self {
        MemoryError::Contract(v)
    }
}

impl From<NetworkFailure> for MemoryError {
    fn from(f: NetworkFailure) -> Self {
        MemoryError::NetworkFailure {
            message: f.message,
            diagnostic: f.diagnostic,
        }
    }
}

impl From<CipherError> for MemoryError {
    fn from(e: CipherError) -> Self {
        MemoryError::IntegrityFailure(e)
    }
}

impl From<SignerError> for MemoryError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Unavailable(message) => MemoryError::NetworkFailure {
                message: format!("external signer unavailable: {message}"),
                diagnostic: None,
            },
            SignerError::Malformed(v) => MemoryError::Contract(v),
            other => MemoryError::AuthenticationFailure(other),
        }
    }
}

impl From<StorageError> for MemoryError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::VersionConflict {
                resource_id,
                expected,
                found,
            } => MemoryError::VersionConflict {
                resource_id,
                expected,
                found,
            },
            StorageError::Network {
                message,
                diagnostic,
            } => MemoryError::NetworkFailure {
                message,
                diagnostic,
            },
            StorageError::ContractViolation(v) => MemoryError::Contract(v),
            other => MemoryError::Storage(other),
        }
    }
}
