#![forbid(unsafe_code)]

use crate::common::{validate_lower_hex, validate_token};
use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const MEMORY_RECORD_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Document type the records live under in the remote document store.
pub const MEMORY_RECORD_SCHEMA_ID: &str = "ainftStorage.storage";

pub const MEMORY_NONCE_LEN: usize = 12;
pub const MEMORY_HASH_HEX_LEN: usize = 64;
pub const DOCUMENT_ID_HEX_LEN: usize = 64;

/// External token identifier a version chain is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_token("resource_id", &id, 128)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Owner wallet address, normalized to trimmed lower-case on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerAddress(String);

impl OwnerAddress {
    pub fn new(address: impl AsRef<str>) -> Result<Self, ContractViolation> {
        let normalized = address.as_ref().trim().to_ascii_lowercase();
        validate_token("owner_address", &normalized, 128)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordVersion(u64);

impl RecordVersion {
    pub const FIRST: RecordVersion = RecordVersion(1);

    pub fn new(version: u64) -> Result<Self, ContractViolation> {
        if version == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "record_version",
                reason: "must be >= 1",
            });
        }
        Ok(Self(version))
    }

    /// Version that follows `prior` in a chain, or `FIRST` when there is none.
    pub fn following(prior: Option<RecordVersion>) -> Result<Self, ContractViolation> {
        match prior {
            None => Ok(Self::FIRST),
            Some(prior) => prior
                .0
                .checked_add(1)
                .map(Self)
                .ok_or(ContractViolation::InvalidValue {
                    field: "record_version",
                    reason: "version chain exhausted",
                }),
        }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content address of one stored record version (lower-case hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_lower_hex("document_id", &id, DOCUMENT_ID_HEX_LEN)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Encrypted payload for a write, before the store assigns a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub resource_id: ResourceId,
    pub owner_address: OwnerAddress,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; MEMORY_NONCE_LEN],
    pub integrity_hash: String,
    pub timestamp: UnixTimeMs,
}

impl RecordDraft {
    pub fn v1(
        resource_id: ResourceId,
        owner_address: OwnerAddress,
        ciphertext: Vec<u8>,
        nonce: [u8; MEMORY_NONCE_LEN],
        integrity_hash: String,
        timestamp: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let draft = Self {
            resource_id,
            owner_address,
            ciphertext,
            nonce,
            integrity_hash,
            timestamp,
        };
        draft.validate()?;
        Ok(draft)
    }
}

impl Validate for RecordDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.ciphertext.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "record_draft.ciphertext",
                reason: "must be non-empty",
            });
        }
        validate_lower_hex(
            "record_draft.integrity_hash",
            &self.integrity_hash,
            MEMORY_HASH_HEX_LEN,
        )?;
        if self.timestamp.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "record_draft.timestamp",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// One immutable version of a memory blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub schema_version: SchemaVersion,
    pub document_id: DocumentId,
    pub resource_id: ResourceId,
    pub owner_address: OwnerAddress,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; MEMORY_NONCE_LEN],
    pub integrity_hash: String,
    pub version: RecordVersion,
    pub timestamp: UnixTimeMs,
}

impl EncryptedRecord {
    pub fn v1(
        draft: RecordDraft,
        version: RecordVersion,
        document_id: DocumentId,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: MEMORY_RECORD_CONTRACT_VERSION,
            document_id,
            resource_id: draft.resource_id,
            owner_address: draft.owner_address,
            ciphertext: draft.ciphertext,
            nonce: draft.nonce,
            integrity_hash: draft.integrity_hash,
            version,
            timestamp: draft.timestamp,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for EncryptedRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != MEMORY_RECORD_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "encrypted_record.schema_version",
                reason: "must match MEMORY_RECORD_CONTRACT_VERSION",
            });
        }
        if self.ciphertext.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "encrypted_record.ciphertext",
                reason: "must be non-empty",
            });
        }
        validate_lower_hex(
            "encrypted_record.integrity_hash",
            &self.integrity_hash,
            MEMORY_HASH_HEX_LEN,
        )?;
        if self.timestamp.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "encrypted_record.timestamp",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    TokenId,
    AgentWallet,
    Version,
}

impl RecordField {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordField::TokenId => "tokenId",
            RecordField::AgentWallet => "agentWallet",
            RecordField::Version => "version",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Integer(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub field: RecordField,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Filtered, ordered, limited read against the document collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub filter: Vec<QueryFilter>,
    pub order_by: Option<(RecordField, SortDirection)>,
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn latest_for_resource(resource_id: &ResourceId) -> Self {
        Self {
            filter: vec![QueryFilter {
                field: RecordField::TokenId,
                operator: FilterOperator::Eq,
                value: FilterValue::Text(resource_id.as_str().to_string()),
            }],
            order_by: Some((RecordField::Version, SortDirection::Desc)),
            limit: Some(1),
        }
    }

    pub fn chain_for_resource(resource_id: &ResourceId) -> Self {
        Self {
            filter: vec![QueryFilter {
                field: RecordField::TokenId,
                operator: FilterOperator::Eq,
                value: FilterValue::Text(resource_id.as_str().to_string()),
            }],
            order_by: Some((RecordField::Version, SortDirection::Asc)),
            limit: None,
        }
    }

    pub fn by_owner(owner_address: &OwnerAddress) -> Self {
        Self {
            filter: vec![QueryFilter {
                field: RecordField::AgentWallet,
                operator: FilterOperator::Eq,
                value: FilterValue::Text(owner_address.as_str().to_string()),
            }],
            order_by: None,
            limit: None,
        }
    }

    /// True when `record` satisfies every filter clause.
    pub fn matches(&self, record: &EncryptedRecord) -> bool {
        self.filter.iter().all(|clause| {
            let FilterOperator::Eq = clause.operator;
            match (clause.field, &clause.value) {
                (RecordField::TokenId, FilterValue::Text(v)) => record.resource_id.as_str() == v,
                (RecordField::AgentWallet, FilterValue::Text(v)) => {
                    record.owner_address.as_str() == v
                }
                (RecordField::Version, FilterValue::Integer(v)) => record.version.get() == *v,
                _ => false,
            }
        })
    }
}
