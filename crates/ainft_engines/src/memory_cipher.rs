#![forbid(unsafe_code)]

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use ainft_contracts::memory_record::MEMORY_NONCE_LEN;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::key_derivation::EncryptionKey;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The GCM tag did not verify: tampered ciphertext or nonce, or the wrong key.
    #[error("memory ciphertext failed authentication")]
    AuthenticityFailure,
    #[error("decrypted memory does not match its integrity hash")]
    HashMismatch,
    #[error("nonce must be {expected} bytes, got {got}")]
    InvalidNonce { expected: usize, got: usize },
    #[error("memory cipher rejected the key")]
    InvalidKey,
    #[error("memory encryption failed")]
    Seal,
    #[error("authenticated plaintext is not valid utf-8")]
    InvalidUtf8,
    #[error("base64 decode error: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Ciphertext, the nonce it was sealed under, and the plaintext hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMemory {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; MEMORY_NONCE_LEN],
    pub hash: String,
}

pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<SealedMemory, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidKey)?;
    let mut nonce_bytes = [0u8; MEMORY_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::Seal)?;

    Ok(SealedMemory {
        ciphertext,
        nonce: nonce_bytes,
        hash: content_hash_hex(plaintext),
    })
}

pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &EncryptionKey) -> Result<String, CipherError> {
    if nonce.len() != MEMORY_NONCE_LEN {
        return Err(CipherError::InvalidNonce {
            expected: MEMORY_NONCE_LEN,
            got: nonce.len(),
        });
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CipherError::InvalidKey)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::AuthenticityFailure)?;
    String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
}

/// Decrypt and require the plaintext to match `expected_hash`.
pub fn open_verified(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &EncryptionKey,
    expected_hash: &str,
) -> Result<String, CipherError> {
    let content = decrypt(ciphertext, nonce, key)?;
    if !verify_hash(&content, expected_hash) {
        return Err(CipherError::HashMismatch);
    }
    Ok(content)
}

/// Lower-case hex SHA-256 of the plaintext bytes.
pub fn content_hash_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn verify_hash(content: &str, expected_hash: &str) -> bool {
    content_hash_hex(content).eq_ignore_ascii_case(expected_hash.trim())
}

pub fn to_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn from_base64(encoded: &str) -> Result<Vec<u8>, CipherError> {
    Ok(BASE64.decode(encoded.trim().as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_derivation::derive_key;

    fn key(context: &str) -> EncryptionKey {
        derive_key(&[0x5a; 32], context).unwrap()
    }

    #[test]
    fn at_cipher_01_roundtrip_restores_plaintext() {
        let k = key("42");
        let long = "x".repeat(4096);
        for text in ["hello", "", "memory with ünïcode ✓", long.as_str()] {
            let sealed = encrypt(text, &k).unwrap();
            assert_eq!(decrypt(&sealed.ciphertext, &sealed.nonce, &k).unwrap(), text);
        }
    }

    #[test]
    fn at_cipher_02_each_call_uses_fresh_nonce() {
        let k = key("42");
        let a = encrypt("same", &k).unwrap();
        let b = encrypt("same", &k).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn at_cipher_03_any_ciphertext_bit_flip_fails_authentication() {
        let k = key("42");
        let sealed = encrypt("tamper me", &k).unwrap();
        for byte in 0..sealed.ciphertext.len() {
            for bit in [0u8, 3, 7] {
                let mut tampered = sealed.ciphertext.clone();
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    decrypt(&tampered, &sealed.nonce, &k),
                    Err(CipherError::AuthenticityFailure)
                ));
            }
        }
    }

    #[test]
    fn at_cipher_04_nonce_bit_flip_fails_authentication() {
        let k = key("42");
        let sealed = encrypt("tamper nonce", &k).unwrap();
        for byte in 0..MEMORY_NONCE_LEN {
            let mut nonce = sealed.nonce;
            nonce[byte] ^= 0x01;
            assert!(matches!(
                decrypt(&sealed.ciphertext, &nonce, &k),
                Err(CipherError::AuthenticityFailure)
            ));
        }
    }

    #[test]
    fn at_cipher_05_wrong_key_fails_authentication() {
        let sealed = encrypt("secret", &key("42")).unwrap();
        assert!(matches!(
            decrypt(&sealed.ciphertext, &sealed.nonce, &key("43")),
            Err(CipherError::AuthenticityFailure)
        ));
    }

    #[test]
    fn at_cipher_06_hash_binds_plaintext() {
        let sealed = encrypt("hello", &key("42")).unwrap();
        assert!(verify_hash("hello", &sealed.hash));
        assert!(verify_hash("hello", &sealed.hash.to_ascii_uppercase()));
        assert!(!verify_hash("hello ", &sealed.hash));
        assert!(!verify_hash("Hello", &sealed.hash));
        assert_eq!(
            sealed.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn at_cipher_07_open_verified_rejects_hash_mismatch() {
        let k = key("42");
        let sealed = encrypt("hello", &k).unwrap();
        assert_eq!(
            open_verified(&sealed.ciphertext, &sealed.nonce, &k, &sealed.hash).unwrap(),
            "hello"
        );
        let other = content_hash_hex("goodbye");
        assert!(matches!(
            open_verified(&sealed.ciphertext, &sealed.nonce, &k, &other),
            Err(CipherError::HashMismatch)
        ));
    }

    #[test]
    fn at_cipher_08_short_nonce_is_rejected_before_decrypt() {
        let k = key("42");
        let sealed = encrypt("x", &k).unwrap();
        assert!(matches!(
            decrypt(&sealed.ciphertext, &sealed.nonce[..8], &k),
            Err(CipherError::InvalidNonce { expected: 12, got: 8 })
        ));
    }

    #[test]
    fn at_cipher_09_base64_roundtrip_is_exact() {
        let raw: Vec<u8> = (0u8..=255).collect();
        assert_eq!(from_base64(&to_base64(&raw)).unwrap(), raw);
        assert!(matches!(from_base64("!!"), Err(CipherError::Encoding(_))));
    }
}
