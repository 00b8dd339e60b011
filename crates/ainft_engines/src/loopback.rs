#![forbid(unsafe_code)]

//! Local loopback capabilities for offline runs and tests.
//!
//! The loopback signer derives a keyed SHA-256 tag in the 65-byte `r || s || v`
//! shape. It is not a ledger signature; the verifier recovers only signers it was
//! constructed with.

use ainft_contracts::memory_record::OwnerAddress;
use ainft_contracts::transition::{
    SignerKeyId, TransitionReference, TransitionSignature, SIGNATURE_LEN,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::transaction_signer::{
    double_sha256, BroadcastEndpoint, NetworkFailure, SignatureVerifier, Signer, SignerError,
    DIGEST_LEN,
};

const LOOPBACK_RECOVERY_ID: u8 = 27;

pub struct LoopbackSigner {
    address: OwnerAddress,
    key_id: SignerKeyId,
    seed: [u8; 32],
}

impl LoopbackSigner {
    pub fn new(address: OwnerAddress, key_id: SignerKeyId, seed: [u8; 32]) -> Self {
        Self {
            address,
            key_id,
            seed,
        }
    }
}

impl Drop for LoopbackSigner {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for LoopbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSigner")
            .field("address", &self.address)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl Signer for LoopbackSigner {
    fn key_id(&self) -> SignerKeyId {
        self.key_id
    }

    fn address(&self) -> &OwnerAddress {
        &self.address
    }

    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> Result<TransitionSignature, SignerError> {
        Ok(loopback_tag(&self.seed, digest))
    }

    fn sign_message(&self, message: &str) -> Result<TransitionSignature, SignerError> {
        Ok(loopback_tag(&self.seed, &personal_message_digest(message)))
    }
}

#[derive(Default)]
pub struct LoopbackVerifier {
    known: Vec<(OwnerAddress, [u8; 32])>,
}

impl LoopbackVerifier {
    pub fn new(known: Vec<(OwnerAddress, [u8; 32])>) -> Self {
        Self { known }
    }
}

impl Drop for LoopbackVerifier {
    fn drop(&mut self) {
        for (_, seed) in &mut self.known {
            seed.zeroize();
        }
    }
}

impl SignatureVerifier for LoopbackVerifier {
    fn recover_digest_signer(
        &self,
        digest: &[u8; DIGEST_LEN],
        signature: &TransitionSignature,
    ) -> Result<OwnerAddress, SignerError> {
        self.known
            .iter()
            .find(|(_, seed)| loopback_tag(seed, digest) == *signature)
            .map(|(address, _)| address.clone())
            .ok_or(SignerError::Unrecoverable)
    }

    fn recover_message_signer(
        &self,
        message: &str,
        signature: &TransitionSignature,
    ) -> Result<OwnerAddress, SignerError> {
        self.recover_digest_signer(&personal_message_digest(message), signature)
    }
}

/// Accepts every payload and references it by its double-SHA256.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackBroadcast;

impl BroadcastEndpoint for LoopbackBroadcast {
    fn broadcast(&self, payload: &[u8]) -> Result<TransitionReference, NetworkFailure> {
        Ok(TransitionReference(format!(
            "loopback:{}",
            hex::encode(double_sha256(payload))
        )))
    }
}

/// Digest of a length-prefixed personal message, in the shape wallets sign.
pub fn personal_message_digest(message: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

fn loopback_tag(seed: &[u8; 32], digest: &[u8; DIGEST_LEN]) -> TransitionSignature {
    let r: [u8; 32] = Sha256::new()
        .chain_update(seed)
        .chain_update(digest)
        .finalize()
        .into();
    let s: [u8; 32] = Sha256::new()
        .chain_update(r)
        .chain_update(seed)
        .chain_update(digest)
        .finalize()
        .into();
    let mut out = [0u8; SIGNATURE_LEN];
    out[..32].copy_from_slice(&r);
    out[32..64].copy_from_slice(&s);
    out[64] = LOOPBACK_RECOVERY_ID;
    TransitionSignature::from_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_loopback_01_message_signature_recovers_to_signer() {
        let address = OwnerAddress::new("0xabc").unwrap();
        let signer = LoopbackSigner::new(address.clone(), SignerKeyId(0), [1u8; 32]);
        let verifier = LoopbackVerifier::new(vec![(address.clone(), [1u8; 32])]);
        let sig = signer.sign_message("link me").unwrap();
        assert_eq!(verifier.recover_message_signer("link me", &sig).unwrap(), address);
        assert_eq!(
            verifier.recover_message_signer("link you", &sig).unwrap_err(),
            SignerError::Unrecoverable
        );
    }

    #[test]
    fn at_loopback_02_signatures_are_deterministic_and_key_bound() {
        let address = OwnerAddress::new("0xabc").unwrap();
        let a = LoopbackSigner::new(address.clone(), SignerKeyId(0), [1u8; 32]);
        let b = LoopbackSigner::new(address, SignerKeyId(0), [2u8; 32]);
        let digest = [7u8; DIGEST_LEN];
        assert_eq!(a.sign_digest(&digest).unwrap(), a.sign_digest(&digest).unwrap());
        assert_ne!(a.sign_digest(&digest).unwrap(), b.sign_digest(&digest).unwrap());
        assert_eq!(a.sign_digest(&digest).unwrap().as_bytes()[64], 27);
    }

    #[test]
    fn at_loopback_03_debug_hides_seed() {
        let signer = LoopbackSigner::new(OwnerAddress::new("0xabc").unwrap(), SignerKeyId(0), [0xEE; 32]);
        let rendered = format!("{signer:?}");
        assert!(!rendered.contains("238"));
        assert!(rendered.contains("0xabc"));
    }
}
