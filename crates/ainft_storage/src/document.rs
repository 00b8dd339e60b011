#![forbid(unsafe_code)]

use ainft_contracts::memory_record::{
    DocumentId, EncryptedRecord, OwnerAddress, RecordDraft, RecordVersion, ResourceId,
    MEMORY_NONCE_LEN,
};
use ainft_contracts::UnixTimeMs;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::record_store::StorageError;

/// Wire form of one record version as the document collaborator stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDocument {
    #[serde(rename = "$id")]
    pub id: String,
    pub token_id: String,
    pub agent_wallet: String,
    /// Base64 ciphertext with the GCM tag appended.
    pub encrypted_memory: String,
    pub memory_hash: String,
    /// Base64 of the 12-byte nonce.
    pub encryption_nonce: String,
    pub version: u64,
    pub timestamp: u64,
}

impl MemoryDocument {
    pub fn from_record(record: &EncryptedRecord) -> Self {
        Self {
            id: record.document_id.as_str().to_string(),
            token_id: record.resource_id.as_str().to_string(),
            agent_wallet: record.owner_address.as_str().to_string(),
            encrypted_memory: BASE64.encode(&record.ciphertext),
            memory_hash: record.integrity_hash.clone(),
            encryption_nonce: BASE64.encode(record.nonce),
            version: record.version.get(),
            timestamp: record.timestamp.0,
        }
    }

    pub fn into_record(self) -> Result<EncryptedRecord, StorageError> {
        let ciphertext = BASE64
            .decode(self.encrypted_memory.as_bytes())
            .map_err(|e| StorageError::Corrupt(format!("encryptedMemory: {e}")))?;
        let nonce_raw = BASE64
            .decode(self.encryption_nonce.as_bytes())
            .map_err(|e| StorageError::Corrupt(format!("encryptionNonce: {e}")))?;
        let nonce: [u8; MEMORY_NONCE_LEN] = nonce_raw.as_slice().try_into().map_err(|_| {
            StorageError::Corrupt(format!(
                "encryptionNonce must be {MEMORY_NONCE_LEN} bytes, got {}",
                nonce_raw.len()
            ))
        })?;
        let draft = RecordDraft::v1(
            ResourceId::new(self.token_id)?,
            OwnerAddress::new(self.agent_wallet)?,
            ciphertext,
            nonce,
            self.memory_hash.to_ascii_lowercase(),
            UnixTimeMs(self.timestamp),
        )?;
        Ok(EncryptedRecord::v1(
            draft,
            RecordVersion::new(self.version)?,
            DocumentId::new(self.id)?,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EncryptedRecord {
        let draft = RecordDraft::v1(
            ResourceId::new("7").unwrap(),
            OwnerAddress::new("0xAAA").unwrap(),
            vec![9u8; 20],
            [3u8; MEMORY_NONCE_LEN],
            "b".repeat(64),
            UnixTimeMs(1_700_000_000_123),
        )
        .unwrap();
        EncryptedRecord::v1(draft, RecordVersion::new(4).unwrap(), DocumentId::new("c".repeat(64)).unwrap())
            .unwrap()
    }

    #[test]
    fn at_document_01_wire_field_names_match_document_schema() {
        let json = serde_json::to_value(MemoryDocument::from_record(&record())).unwrap();
        for field in [
            "$id",
            "tokenId",
            "agentWallet",
            "encryptedMemory",
            "memoryHash",
            "encryptionNonce",
            "version",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["agentWallet"], "0xaaa");
        assert_eq!(json["version"], 4);
    }

    #[test]
    fn at_document_02_decoded_document_restores_record() {
        let original = record();
        let back = MemoryDocument::from_record(&original).into_record().unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn at_document_03_bad_nonce_length_is_corrupt() {
        let mut doc = MemoryDocument::from_record(&record());
        doc.encryption_nonce = BASE64.encode([0u8; 8]);
        assert!(matches!(doc.into_record(), Err(StorageError::Corrupt(_))));

        let mut doc = MemoryDocument::from_record(&record());
        doc.version = 0;
        assert!(matches!(
            doc.into_record(),
            Err(StorageError::ContractViolation(_))
        ));
    }
}
