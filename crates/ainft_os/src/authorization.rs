#![forbid(unsafe_code)]

use ainft_contracts::gateway::StorageAuthMessage;
use ainft_contracts::memory_record::{EncryptedRecord, OwnerAddress};
use ainft_contracts::transition::TransitionSignature;
use ainft_contracts::UnixTimeMs;
use ainft_engines::transaction_signer::{SignatureVerifier, Signer, SignerError};
use tracing::debug;

use crate::error::MemoryError;
use crate::session::Session;

/// Authorization for a relayer to store `record` under the session's identity.
pub fn storage_auth_for_record(
    session: &Session,
    record: &EncryptedRecord,
    nonce: u64,
    expiry: UnixTimeMs,
) -> Result<StorageAuthMessage, MemoryError> {
    Ok(StorageAuthMessage::v1(
        format!("0x{}", record.integrity_hash),
        session.identity_id().to_string(),
        record.resource_id.clone(),
        nonce,
        expiry,
    )?)
}

pub fn sign_storage_authorization(
    signer: &dyn Signer,
    message: &StorageAuthMessage,
) -> Result<TransitionSignature, MemoryError> {
    Ok(signer.sign_message(&message.render())?)
}

/// Reject expired messages, then require the signature to recover to `expected`.
pub fn verify_storage_authorization(
    verifier: &dyn SignatureVerifier,
    message: &StorageAuthMessage,
    signature: &TransitionSignature,
    expected: &OwnerAddress,
    now: UnixTimeMs,
) -> Result<(), MemoryError> {
    if message.is_expired(now) {
        return Err(MemoryError::AuthorizationExpired {
            expiry_ms: message.expiry.0,
        });
    }
    let recovered = verifier.recover_message_signer(&message.render(), signature)?;
    if &recovered != expected {
        return Err(MemoryError::AuthenticationFailure(
            SignerError::AuthenticationFailure {
                expected: expected.as_str().to_string(),
                recovered: recovered.as_str().to_string(),
            },
        ));
    }
    debug!(
        token_id = message.token_id.as_str(),
        nonce = message.nonce,
        "storage authorization verified"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{owner, signer, verifier};
    use ainft_contracts::memory_record::ResourceId;

    fn message(expiry: u64) -> StorageAuthMessage {
        StorageAuthMessage::v1(
            format!("0x{}", "ab".repeat(32)),
            "identity-aa".to_string(),
            ResourceId::new("42").unwrap(),
            9,
            UnixTimeMs(expiry),
        )
        .unwrap()
    }

    #[test]
    fn at_auth_01_signed_message_verifies_for_owner() {
        let msg = message(2_000);
        let sig = sign_storage_authorization(&signer(), &msg).unwrap();
        verify_storage_authorization(&verifier(), &msg, &sig, &owner(), UnixTimeMs(1_000)).unwrap();
    }

    #[test]
    fn at_auth_02_expired_message_is_rejected_before_recovery() {
        let msg = message(1_000);
        let sig = sign_storage_authorization(&signer(), &msg).unwrap();
        let err = verify_storage_authorization(&verifier(), &msg, &sig, &owner(), UnixTimeMs(1_000))
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::AuthorizationExpired { expiry_ms: 1_000 }
        ));
    }

    #[test]
    fn at_auth_03_other_address_is_authentication_failure() {
        let msg = message(2_000);
        let sig = sign_storage_authorization(&signer(), &msg).unwrap();
        let other = OwnerAddress::new("0xbb").unwrap();
        let err = verify_storage_authorization(&verifier(), &msg, &sig, &other, UnixTimeMs(1))
            .unwrap_err();
        assert!(matches!(err, MemoryError::AuthenticationFailure(_)));
    }

    #[test]
    fn at_auth_04_changed_nonce_does_not_verify() {
        let msg = message(2_000);
        let sig = sign_storage_authorization(&signer(), &msg).unwrap();
        let mut replay = msg.clone();
        replay.nonce = 10;
        let err = verify_storage_authorization(&verifier(), &replay, &sig, &owner(), UnixTimeMs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::AuthenticationFailure(SignerError::Unrecoverable)
        ));
    }
}
