#![forbid(unsafe_code)]

use ainft_contracts::memory_record::{
    DocumentId, EncryptedRecord, OwnerAddress, RecordDraft, RecordQuery, RecordVersion,
    ResourceId, MEMORY_RECORD_SCHEMA_ID,
};
use ainft_contracts::transition::TransitionKind;
use ainft_contracts::ContractViolation;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    /// The write's expected prior version no longer matches the stored chain.
    #[error("version conflict on {resource_id}: expected prior {expected:?}, found {found:?}")]
    VersionConflict {
        resource_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("record {resource_id} is owned by {owner}, not {requested_by}")]
    OwnerMismatch {
        resource_id: String,
        owner: String,
        requested_by: String,
    },
    #[error("record collaborator failure: {message}")]
    Network {
        message: String,
        diagnostic: Option<String>,
    },
    #[error("stored document is corrupt: {0}")]
    Corrupt(String),
    #[error("contract violation: {0:?}")]
    ContractViolation(ContractViolation),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

/// Generic filtered document collaborator the record store reads and writes through.
pub trait RecordBackend {
    fn query(&self, query: &RecordQuery) -> Result<Vec<EncryptedRecord>, StorageError>;

    /// Write the first version of a chain. Rejected with `VersionConflict` when any
    /// version already exists for the resource.
    fn create(&mut self, record: EncryptedRecord) -> Result<(), StorageError>;

    /// Append the next version. Rejected with `VersionConflict` unless the stored
    /// latest version equals `expected_prior`.
    fn replace(
        &mut self,
        record: EncryptedRecord,
        expected_prior: RecordVersion,
    ) -> Result<(), StorageError>;
}

/// A record with its assigned version, ready to be written with a precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWrite {
    pub record: EncryptedRecord,
    pub kind: TransitionKind,
    pub expected_prior: Option<RecordVersion>,
}

#[derive(Debug)]
pub struct VersionedRecordStore<B: RecordBackend> {
    backend: B,
    schema_id: String,
}

impl<B: RecordBackend> VersionedRecordStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_schema_id(backend, MEMORY_RECORD_SCHEMA_ID)
    }

    pub fn with_schema_id(backend: B, schema_id: impl Into<String>) -> Self {
        Self {
            backend,
            schema_id: schema_id.into(),
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn get_latest(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<EncryptedRecord>, StorageError> {
        let rows = self
            .backend
            .query(&RecordQuery::latest_for_resource(resource_id))?;
        let latest = rows.into_iter().next();
        debug!(
            resource_id = resource_id.as_str(),
            version = latest.as_ref().map(|r| r.version.get()),
            "memory record latest lookup"
        );
        Ok(latest)
    }

    pub fn list_by_owner(
        &self,
        owner_address: &OwnerAddress,
    ) -> Result<Vec<EncryptedRecord>, StorageError> {
        self.backend.query(&RecordQuery::by_owner(owner_address))
    }

    /// Every stored version of `resource_id`, oldest first.
    pub fn version_chain(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<EncryptedRecord>, StorageError> {
        self.backend
            .query(&RecordQuery::chain_for_resource(resource_id))
    }

    /// Re-read the latest version and assign the next one to `draft`.
    pub fn prepare(&self, draft: RecordDraft) -> Result<PreparedWrite, StorageError> {
        let latest = self.get_latest(&draft.resource_id)?;
        if let Some(latest) = &latest {
            ensure_same_owner(latest, &draft.owner_address)?;
        }
        self.prepare_against(latest.map(|r| r.version), draft)
    }

    /// Assign the version that follows `expected_prior` without reading the backend.
    pub fn prepare_against(
        &self,
        expected_prior: Option<RecordVersion>,
        draft: RecordDraft,
    ) -> Result<PreparedWrite, StorageError> {
        let version = RecordVersion::following(expected_prior)?;
        let document_id = document_id_for(&self.schema_id, &draft, version)?;
        let record = EncryptedRecord::v1(draft, version, document_id)?;
        let kind = match expected_prior {
            None => TransitionKind::Create,
            Some(_) => TransitionKind::Replace,
        };
        Ok(PreparedWrite {
            record,
            kind,
            expected_prior,
        })
    }

    /// Conditional write of a prepared record; one remote write.
    pub fn commit(&mut self, prepared: PreparedWrite) -> Result<EncryptedRecord, StorageError> {
        let PreparedWrite {
            record,
            expected_prior,
            ..
        } = prepared;
        match expected_prior {
            None => self.backend.create(record.clone())?,
            Some(prior) => self.backend.replace(record.clone(), prior)?,
        }
        info!(
            resource_id = record.resource_id.as_str(),
            version = record.version.get(),
            document_id = record.document_id.as_str(),
            "memory record committed"
        );
        Ok(record)
    }

    /// Read-modify-write: re-read latest, then write `latest + 1` conditioned on it.
    pub fn put(&mut self, draft: RecordDraft) -> Result<EncryptedRecord, StorageError> {
        let prepared = self.prepare(draft)?;
        self.commit(prepared)
    }

    /// Write `draft` as the successor of `expected`; the backend rejects the write
    /// with `VersionConflict` if the stored latest differs. Only the chain's owner
    /// may extend it.
    pub fn put_if_version(
        &mut self,
        expected: Option<RecordVersion>,
        draft: RecordDraft,
    ) -> Result<EncryptedRecord, StorageError> {
        if expected.is_some() {
            if let Some(latest) = self.get_latest(&draft.resource_id)? {
                ensure_same_owner(&latest, &draft.owner_address)?;
            }
        }
        let prepared = self.prepare_against(expected, draft)?;
        self.commit(prepared)
    }
}

/// `OwnerMismatch` unless `requested_by` owns the chain `latest` belongs to.
pub fn ensure_same_owner(
    latest: &EncryptedRecord,
    requested_by: &OwnerAddress,
) -> Result<(), StorageError> {
    if &latest.owner_address == requested_by {
        return Ok(());
    }
    Err(StorageError::OwnerMismatch {
        resource_id: latest.resource_id.as_str().to_string(),
        owner: latest.owner_address.as_str().to_string(),
        requested_by: requested_by.as_str().to_string(),
    })
}

/// Content address of a record version under `schema_id`.
pub fn document_id_for(
    schema_id: &str,
    draft: &RecordDraft,
    version: RecordVersion,
) -> Result<DocumentId, ContractViolation> {
    let version_bytes = version.get().to_be_bytes();
    let mut hasher = Sha256::new();
    for part in [
        schema_id.as_bytes(),
        draft.resource_id.as_str().as_bytes(),
        &version_bytes[..],
        draft.owner_address.as_str().as_bytes(),
        draft.integrity_hash.as_bytes(),
    ] {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    DocumentId::new(hex::encode(hasher.finalize()))
}
