#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::memory_record::{DocumentId, RecordVersion, ResourceId};
use crate::storage_uri::StorageUri;
use crate::transition::TransitionReference;
use crate::{ContractViolation, UnixTimeMs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Testnet => "testnet",
            Network::Mainnet => "mainnet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "testnet" => Some(Network::Testnet),
            "mainnet" => Some(Network::Mainnet),
            _ => None,
        }
    }
}

/// Message an owner signs to bind their wallet address to a ledger identity.
pub fn identity_link_message(eth_address: &str) -> String {
    format!("Link Dash Identity to {eth_address} for Pentagon AINFT storage on peg.gg")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLinkRequest {
    pub eth_address: String,
    pub eth_signature: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLinkResponse {
    pub identity_id: String,
    /// Recovery credential for the linked identity.
    pub mnemonic: String,
    pub credits: u64,
}

impl std::fmt::Debug for IdentityLinkResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLinkResponse")
            .field("identity_id", &self.identity_id)
            .field("mnemonic", &"<redacted>")
            .field("credits", &self.credits)
            .finish()
    }
}

impl Validate for IdentityLinkResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("identity_link_response.identity_id", &self.identity_id, 128)?;
        if self.mnemonic.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "identity_link_response.mnemonic",
                reason: "must be non-empty",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    pub credits: u64,
    pub max_credits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRequest {
    pub eth_address: String,
    pub amount: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnReceipt {
    pub credits_added: u64,
    pub total_credits: u64,
}

/// Outcome of a successful memory write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResult {
    pub document_id: DocumentId,
    pub version: RecordVersion,
    pub transition_hash: TransitionReference,
    pub storage_uri: StorageUri,
}

/// Decrypted and hash-verified memory content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult {
    pub content: String,
    pub memory_hash: String,
    pub version: RecordVersion,
    pub timestamp: UnixTimeMs,
}

/// Storage authorization an owner signs before a relayer writes on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAuthMessage {
    pub blob_hash: String,
    pub identity_id: String,
    pub token_id: ResourceId,
    pub nonce: u64,
    pub expiry: UnixTimeMs,
}

impl StorageAuthMessage {
    pub fn v1(
        blob_hash: String,
        identity_id: String,
        token_id: ResourceId,
        nonce: u64,
        expiry: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let msg = Self {
            blob_hash,
            identity_id,
            token_id,
            nonce,
            expiry,
        };
        msg.validate()?;
        Ok(msg)
    }

    pub fn render(&self) -> String {
        format!(
            "Authorize peg.gg storage: blobHash={}, identity={}, AINFT={}, nonce={}, expiry={}",
            self.blob_hash,
            self.identity_id,
            self.token_id.as_str(),
            self.nonce,
            self.expiry.0
        )
    }

    pub fn is_expired(&self, now: UnixTimeMs) -> bool {
        now >= self.expiry
    }
}

impl Validate for StorageAuthMessage {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("storage_auth_message.blob_hash", &self.blob_hash, 130)?;
        validate_token("storage_auth_message.identity_id", &self.identity_id, 128)?;
        if self.expiry.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "storage_auth_message.expiry",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}
