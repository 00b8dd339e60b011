#![forbid(unsafe_code)]

use hkdf::Hkdf;
use p256::ecdh::diffie_hellman;
use p256::{PublicKey, SecretKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

pub const ENCRYPTION_KEY_LEN: usize = 32;
pub const MAX_OWNER_SECRET_LEN: usize = 64;

const SALT_NAMESPACE: &[u8] = b"pentagon-ainft-";
const MEMORY_ENCRYPTION_INFO: &[u8] = b"ainft-memory-encryption";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyDerivationError {
    #[error("owner secret must not be empty")]
    EmptySecret,
    #[error("owner secret length {got} exceeds {max} bytes")]
    InvalidSecretLength { got: usize, max: usize },
    #[error("context id must not be empty")]
    EmptyContext,
    #[error("hkdf expand failed")]
    Expand,
    #[error("private key is not a valid P-256 scalar")]
    InvalidPrivateKey,
    #[error("public key is not a valid SEC1 P-256 point")]
    InvalidPublicKey,
}

/// Per-record AES-256 key. Lives only in memory and is zeroed on drop.
#[derive(PartialEq, Eq)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Derive the memory encryption key for `context_id` from the owner's secret.
///
/// HKDF-SHA256 with salt `pentagon-ainft-{context_id}` and the fixed info string
/// `ainft-memory-encryption`. Pure: the same inputs always yield the same key.
pub fn derive_key(secret: &[u8], context_id: &str) -> Result<EncryptionKey, KeyDerivationError> {
    if secret.is_empty() {
        return Err(KeyDerivationError::EmptySecret);
    }
    if secret.len() > MAX_OWNER_SECRET_LEN {
        return Err(KeyDerivationError::InvalidSecretLength {
            got: secret.len(),
            max: MAX_OWNER_SECRET_LEN,
        });
    }
    if context_id.is_empty() {
        return Err(KeyDerivationError::EmptyContext);
    }

    let mut salt = Vec::with_capacity(SALT_NAMESPACE.len() + context_id.len());
    salt.extend_from_slice(SALT_NAMESPACE);
    salt.extend_from_slice(context_id.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), secret);
    let mut okm = [0u8; ENCRYPTION_KEY_LEN];
    hk.expand(MEMORY_ENCRYPTION_INFO, &mut okm)
        .map_err(|_| KeyDerivationError::Expand)?;
    Ok(EncryptionKey(okm))
}

/// P-256 ECDH agreement between our 32-byte private scalar and a peer's SEC1
/// public key (compressed or uncompressed). Both sides derive the same 32 bytes:
/// the x-coordinate of the shared point.
pub fn derive_shared_key(
    private_key: &[u8],
    public_key: &[u8],
) -> Result<EncryptionKey, KeyDerivationError> {
    let secret =
        SecretKey::from_slice(private_key).map_err(|_| KeyDerivationError::InvalidPrivateKey)?;
    let public =
        PublicKey::from_sec1_bytes(public_key).map_err(|_| KeyDerivationError::InvalidPublicKey)?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut out = [0u8; ENCRYPTION_KEY_LEN];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(EncryptionKey(out))
}
