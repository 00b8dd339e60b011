#![forbid(unsafe_code)]

use ainft_contracts::gateway::{
    identity_link_message, BurnReceipt, BurnRequest, IdentityLinkRequest, IdentityLinkResponse,
    StorageQuota,
};
use ainft_contracts::memory_record::OwnerAddress;
use ainft_contracts::{ContractViolation, Validate};
use ainft_engines::transaction_signer::{NetworkFailure, Signer};
use tracing::info;

use crate::error::MemoryError;

/// Identity and quota endpoints of the storage gateway.
pub trait IdentityGateway {
    fn link_identity(
        &self,
        request: &IdentityLinkRequest,
    ) -> Result<IdentityLinkResponse, NetworkFailure>;

    fn storage_quota(&self, owner: &OwnerAddress) -> Result<StorageQuota, NetworkFailure>;

    fn register_burn(&self, request: &BurnRequest) -> Result<BurnReceipt, NetworkFailure>;
}

/// Linked identity every memory flow runs under. Only `establish` and `resume`
/// produce one, so no flow can run before the identity is known.
#[derive(Clone)]
pub struct Session {
    identity_id: String,
    owner_address: OwnerAddress,
    credits: u64,
    recovery_credential: Option<String>,
}

impl Session {
    /// Sign the link message with `signer`, bind the wallet to a ledger identity
    /// through `gateway`, and open a session for it.
    pub fn establish(
        gateway: &dyn IdentityGateway,
        signer: &dyn Signer,
    ) -> Result<Self, MemoryError> {
        let owner_address = signer.address().clone();
        let message = identity_link_message(owner_address.as_str());
        let signature = signer.sign_message(&message)?;
        let request = IdentityLinkRequest {
            eth_address: owner_address.as_str().to_string(),
            eth_signature: format!("0x{}", hex::encode(signature.as_bytes())),
        };
        let response = gateway.link_identity(&request)?;
        response.validate()?;
        info!(
            identity_id = response.identity_id.as_str(),
            owner = owner_address.as_str(),
            credits = response.credits,
            "identity linked"
        );
        Ok(Self {
            identity_id: response.identity_id,
            owner_address,
            credits: response.credits,
            recovery_credential: Some(response.mnemonic),
        })
    }

    /// Session for an identity linked in an earlier run.
    pub fn resume(
        identity_id: impl Into<String>,
        owner_address: OwnerAddress,
    ) -> Result<Self, ContractViolation> {
        let identity_id = identity_id.into();
        if identity_id.trim().is_empty() || identity_id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "session.identity_id",
                reason: "must be 1..=128 chars",
            });
        }
        Ok(Self {
            identity_id,
            owner_address,
            credits: 0,
            recovery_credential: None,
        })
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn owner_address(&self) -> &OwnerAddress {
        &self.owner_address
    }

    /// Credits reported when the identity was linked.
    pub fn credits(&self) -> u64 {
        self.credits
    }

    pub fn recovery_credential(&self) -> Option<&str> {
        self.recovery_credential.as_deref()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity_id", &self.identity_id)
            .field("owner_address", &self.owner_address)
            .field("credits", &self.credits)
            .finish_non_exhaustive()
    }
}
