#![forbid(unsafe_code)]

//! State-transition signing pipeline.
//!
//! `PendingStateChange` (Built) -> `SignableTransition` (signable bytes + digest)
//! -> `SignedTransition` -> `AttachedTransition` -> broadcast. Each step consumes
//! the previous value, so an attached transition cannot be signed again; a new
//! signature needs a rebuilt `PendingStateChange`.

use ainft_contracts::memory_record::{EncryptedRecord, OwnerAddress};
use ainft_contracts::transition::{
    PayloadValue, SignerKeyId, TransitionKind, TransitionPayload, TransitionReference,
    TransitionSignature, TransitionState, SIGNATURE_LEN, TRANSITION_PROTOCOL_VERSION,
};
use ainft_contracts::ContractViolation;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CANONICAL_MAGIC_V1: &[u8; 8] = b"AINFTST1";
pub const DIGEST_LEN: usize = 32;

const VALUE_TAG_INTEGER: u8 = 1;
const VALUE_TAG_TEXT: u8 = 2;
const VALUE_TAG_BYTES: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("external signer unavailable: {0}")]
    Unavailable(String),
    #[error("signature recovers to {recovered}, expected {expected}")]
    AuthenticationFailure { expected: String, recovered: String },
    #[error("signature could not be recovered to any address")]
    Unrecoverable,
    #[error("malformed signature: {0:?}")]
    Malformed(ContractViolation),
}

/// Transport-level or non-success failure from a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NetworkFailure {
    pub message: String,
    /// Raw response body or transport detail, if any.
    pub diagnostic: Option<String>,
}

impl NetworkFailure {
    pub fn new(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        Self {
            message: message.into(),
            diagnostic,
        }
    }
}

/// External signing capability. Private keys never enter this process.
pub trait Signer {
    fn key_id(&self) -> SignerKeyId;
    fn address(&self) -> &OwnerAddress;
    fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> Result<TransitionSignature, SignerError>;
    /// Personal-message signature over human-readable text.
    fn sign_message(&self, message: &str) -> Result<TransitionSignature, SignerError>;
}

/// Recovers the signing address from a signature.
pub trait SignatureVerifier {
    fn recover_digest_signer(
        &self,
        digest: &[u8; DIGEST_LEN],
        signature: &TransitionSignature,
    ) -> Result<OwnerAddress, SignerError>;

    fn recover_message_signer(
        &self,
        message: &str,
        signature: &TransitionSignature,
    ) -> Result<OwnerAddress, SignerError>;
}

pub trait BroadcastEndpoint {
    fn broadcast(&self, payload: &[u8]) -> Result<TransitionReference, NetworkFailure>;
}

/// Deterministic byte layout a signature is computed over.
pub trait CanonicalEncoding {
    fn encode(
        &self,
        kind: TransitionKind,
        protocol_version: u32,
        payload: &TransitionPayload,
    ) -> Result<Vec<u8>, ContractViolation>;
}

/// Local v1 layout: magic, kind, protocol version, then key-ordered payload entries,
/// every length and integer big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalV1;

impl CanonicalEncoding for CanonicalV1 {
    fn encode(
        &self,
        kind: TransitionKind,
        protocol_version: u32,
        payload: &TransitionPayload,
    ) -> Result<Vec<u8>, ContractViolation> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(CANONICAL_MAGIC_V1);
        out.push(kind.code());
        out.extend_from_slice(&protocol_version.to_be_bytes());
        out.extend_from_slice(&length_prefix("transition_payload.entries", payload.len())?);
        for (key, value) in payload.iter() {
            put_len_prefixed(&mut out, "transition_payload.key", key.as_bytes())?;
            match value {
                PayloadValue::Integer(v) => {
                    out.push(VALUE_TAG_INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PayloadValue::Text(v) => {
                    out.push(VALUE_TAG_TEXT);
                    put_len_prefixed(&mut out, "transition_payload.text", v.as_bytes())?;
                }
                PayloadValue::Bytes(v) => {
                    out.push(VALUE_TAG_BYTES);
                    put_len_prefixed(&mut out, "transition_payload.bytes", v)?;
                }
            }
        }
        Ok(out)
    }
}

/// Big-endian u32 length; counts past `u32::MAX` cannot be encoded.
fn length_prefix(field: &'static str, len: usize) -> Result<[u8; 4], ContractViolation> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| ContractViolation::InvalidValue {
            field,
            reason: "exceeds u32 length prefix",
        })
}

fn put_len_prefixed(
    out: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), ContractViolation> {
    out.extend_from_slice(&length_prefix(field, bytes.len())?);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Kind and protocol version from the head of v1 signable bytes.
pub fn decode_signable_header(signable: &[u8]) -> Result<(TransitionKind, u32), ContractViolation> {
    let rest = signable
        .strip_prefix(CANONICAL_MAGIC_V1.as_slice())
        .ok_or(ContractViolation::InvalidValue {
            field: "signable_bytes.magic",
            reason: "must start with AINFTST1",
        })?;
    let (&code, rest) = rest.split_first().ok_or(ContractViolation::InvalidLength {
        field: "signable_bytes.kind",
        expected: 1,
        got: 0,
    })?;
    let kind = TransitionKind::from_code(code).ok_or(ContractViolation::InvalidValue {
        field: "signable_bytes.kind",
        reason: "unknown transition kind",
    })?;
    let version: [u8; 4] = rest
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .ok_or(ContractViolation::InvalidLength {
            field: "signable_bytes.protocol_version",
            expected: 4,
            got: rest.len().min(4),
        })?;
    Ok((kind, u32::from_be_bytes(version)))
}

pub fn double_sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// `signable || key_id || signature`.
pub fn attach_signature(
    signable: &[u8],
    signature: &TransitionSignature,
    key_id: SignerKeyId,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(signable.len() + 1 + SIGNATURE_LEN);
    out.extend_from_slice(signable);
    out.push(key_id.0);
    out.extend_from_slice(signature.as_bytes());
    out
}

/// Payload describing one stored record version.
pub fn record_payload(record: &EncryptedRecord, schema_id: &str) -> TransitionPayload {
    TransitionPayload::new()
        .with("$type", PayloadValue::Text(schema_id.to_string()))
        .with(
            "$id",
            PayloadValue::Text(record.document_id.as_str().to_string()),
        )
        .with(
            "tokenId",
            PayloadValue::Text(record.resource_id.as_str().to_string()),
        )
        .with(
            "agentWallet",
            PayloadValue::Text(record.owner_address.as_str().to_string()),
        )
        .with(
            "encryptedMemory",
            PayloadValue::Bytes(record.ciphertext.clone()),
        )
        .with("memoryHash", PayloadValue::Text(record.integrity_hash.clone()))
        .with("encryptionNonce", PayloadValue::Bytes(record.nonce.to_vec()))
        .with("version", PayloadValue::Integer(record.version.get()))
        .with("timestamp", PayloadValue::Integer(record.timestamp.0))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStateChange {
    pub kind: TransitionKind,
    pub protocol_version: u32,
    pub payload: TransitionPayload,
    /// Owning identity bookkeeping; never part of the signable bytes.
    pub owner_identity_id: Option<String>,
}

impl PendingStateChange {
    pub fn new(kind: TransitionKind, payload: TransitionPayload) -> Self {
        Self {
            kind,
            protocol_version: TRANSITION_PROTOCOL_VERSION,
            payload,
            owner_identity_id: None,
        }
    }

    pub fn for_record(kind: TransitionKind, record: &EncryptedRecord, schema_id: &str) -> Self {
        Self::new(kind, record_payload(record, schema_id))
    }

    pub fn state(&self) -> TransitionState {
        TransitionState::Built
    }

    pub fn extract_signable(
        self,
        encoding: &dyn CanonicalEncoding,
    ) -> Result<SignableTransition, ContractViolation> {
        let signable_bytes = encoding.encode(self.kind, self.protocol_version, &self.payload)?;
        let digest = double_sha256(&signable_bytes);
        Ok(SignableTransition {
            change: self,
            signable_bytes,
            digest,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SignableTransition {
    change: PendingStateChange,
    signable_bytes: Vec<u8>,
    digest: [u8; DIGEST_LEN],
}

impl SignableTransition {
    pub fn state(&self) -> TransitionState {
        TransitionState::SignableBytesExtracted
    }

    pub fn signable_bytes(&self) -> &[u8] {
        &self.signable_bytes
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn change(&self) -> &PendingStateChange {
        &self.change
    }

    pub fn sign(self, signer: &dyn Signer) -> Result<SignedTransition, SignerError> {
        let signature = signer.sign_digest(&self.digest)?;
        Ok(self.with_signature(signature, signer.key_id()))
    }

    /// Accept a signature produced out of process over `digest()`.
    pub fn with_signature(
        self,
        signature: TransitionSignature,
        signer_key_id: SignerKeyId,
    ) -> SignedTransition {
        SignedTransition {
            change: self.change,
            signable_bytes: self.signable_bytes,
            digest: self.digest,
            signature,
            signer_key_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedTransition {
    change: PendingStateChange,
    signable_bytes: Vec<u8>,
    digest: [u8; DIGEST_LEN],
    signature: TransitionSignature,
    signer_key_id: SignerKeyId,
}

impl SignedTransition {
    pub fn state(&self) -> TransitionState {
        TransitionState::Signed
    }

    pub fn signature(&self) -> &TransitionSignature {
        &self.signature
    }

    pub fn signer_key_id(&self) -> SignerKeyId {
        self.signer_key_id
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Record the owning identity after signing; the signed bytes are unaffected.
    pub fn set_owner_identity(&mut self, identity_id: impl Into<String>) {
        self.change.owner_identity_id = Some(identity_id.into());
    }

    pub fn verify_signer(
        &self,
        verifier: &dyn SignatureVerifier,
        expected: &OwnerAddress,
    ) -> Result<(), SignerError> {
        let recovered = verifier.recover_digest_signer(&self.digest, &self.signature)?;
        if &recovered != expected {
            return Err(SignerError::AuthenticationFailure {
                expected: expected.as_str().to_string(),
                recovered: recovered.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn attach(self) -> AttachedTransition {
        let payload = attach_signature(&self.signable_bytes, &self.signature, self.signer_key_id);
        AttachedTransition {
            change: self.change,
            payload,
            digest: self.digest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachedTransition {
    change: PendingStateChange,
    payload: Vec<u8>,
    digest: [u8; DIGEST_LEN],
}

impl AttachedTransition {
    pub fn state(&self) -> TransitionState {
        TransitionState::Attached
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn change(&self) -> &PendingStateChange {
        &self.change
    }

    /// Hex of the double-SHA256 digest the signature covers.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Forward to the endpoint. `Ok` is the Confirmed outcome, `Err` Rejected;
    /// the endpoint's result is passed through unchanged.
    pub fn broadcast(
        self,
        endpoint: &dyn BroadcastEndpoint,
    ) -> Result<TransitionReference, NetworkFailure> {
        endpoint.broadcast(&self.payload)
    }
}
