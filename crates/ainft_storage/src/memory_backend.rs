#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ainft_contracts::memory_record::{
    EncryptedRecord, RecordField, RecordQuery, RecordVersion, ResourceId, SortDirection,
};

use crate::record_store::{ensure_same_owner, RecordBackend, StorageError};

/// Append-only in-process record collaborator. Chains are keyed by resource and
/// kept in version order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordBackend {
    chains: BTreeMap<ResourceId, Vec<EncryptedRecord>>,
}

impl InMemoryRecordBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<EncryptedRecord>) -> Result<Self, StorageError> {
        let mut backend = Self::default();
        let mut sorted = records;
        sorted.sort_by(|a, b| {
            a.resource_id
                .cmp(&b.resource_id)
                .then(a.version.cmp(&b.version))
        });
        for record in sorted {
            let prior = backend.latest_version(&record.resource_id);
            backend.append(record, prior)?;
        }
        Ok(backend)
    }

    pub fn records(&self) -> impl Iterator<Item = &EncryptedRecord> {
        self.chains.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest(&self, resource_id: &ResourceId) -> Option<&EncryptedRecord> {
        self.chains.get(resource_id).and_then(|chain| chain.last())
    }

    fn latest_version(&self, resource_id: &ResourceId) -> Option<RecordVersion> {
        self.latest(resource_id).map(|r| r.version)
    }

    /// Chains are single-owner: a successor must carry the owner of its predecessor.
    fn append(
        &mut self,
        record: EncryptedRecord,
        expected_prior: Option<RecordVersion>,
    ) -> Result<(), StorageError> {
        let found = self.latest_version(&record.resource_id);
        let expected_next = RecordVersion::following(expected_prior)?;
        if found != expected_prior || record.version != expected_next {
            return Err(StorageError::VersionConflict {
                resource_id: record.resource_id.as_str().to_string(),
                expected: expected_prior.map(RecordVersion::get),
                found: found.map(RecordVersion::get),
            });
        }
        if let Some(latest) = self.latest(&record.resource_id) {
            ensure_same_owner(latest, &record.owner_address)?;
        }
        self.chains
            .entry(record.resource_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}

impl RecordBackend for InMemoryRecordBackend {
    fn query(&self, query: &RecordQuery) -> Result<Vec<EncryptedRecord>, StorageError> {
        Ok(run_query(self.records(), query))
    }

    fn create(&mut self, record: EncryptedRecord) -> Result<(), StorageError> {
        self.append(record, None)
    }

    fn replace(
        &mut self,
        record: EncryptedRecord,
        expected_prior: RecordVersion,
    ) -> Result<(), StorageError> {
        self.append(record, Some(expected_prior))
    }
}

/// Filter, order and limit `records` the way the remote document store would.
pub fn run_query<'a>(
    records: impl Iterator<Item = &'a EncryptedRecord>,
    query: &RecordQuery,
) -> Vec<EncryptedRecord> {
    let mut rows: Vec<EncryptedRecord> = records.filter(|r| query.matches(r)).cloned().collect();
    if let Some((field, direction)) = query.order_by {
        rows.sort_by(|a, b| {
            let ord = match field {
                RecordField::Version => a.version.cmp(&b.version),
                RecordField::TokenId => a.resource_id.cmp(&b.resource_id),
                RecordField::AgentWallet => a.owner_address.cmp(&b.owner_address),
            };
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit as usize);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use ainft_contracts::memory_record::{DocumentId, OwnerAddress, RecordDraft};
    use ainft_contracts::UnixTimeMs;

    fn rec(resource: &str, owner: &str, version: u64) -> EncryptedRecord {
        let draft = RecordDraft::v1(
            ResourceId::new(resource).unwrap(),
            OwnerAddress::new(owner).unwrap(),
            vec![version as u8; 4],
            [0u8; 12],
            "e".repeat(64),
            UnixTimeMs(1_000 + version),
        )
        .unwrap();
        let id = format!("{:064x}", version);
        EncryptedRecord::v1(draft, RecordVersion::new(version).unwrap(), DocumentId::new(id).unwrap())
            .unwrap()
    }

    #[test]
    fn at_mem_backend_01_create_twice_conflicts() {
        let mut backend = InMemoryRecordBackend::new();
        backend.create(rec("1", "0xa", 1)).unwrap();
        let err = backend.create(rec("1", "0xa", 1)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict {
                expected: None,
                found: Some(1),
                ..
            }
        ));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn at_mem_backend_02_replace_requires_exact_successor() {
        let mut backend = InMemoryRecordBackend::new();
        backend.create(rec("1", "0xa", 1)).unwrap();
        assert!(backend
            .replace(rec("1", "0xa", 3), RecordVersion::FIRST)
            .is_err());
        backend
            .replace(rec("1", "0xa", 2), RecordVersion::FIRST)
            .unwrap();
        assert!(backend
            .replace(rec("1", "0xa", 3), RecordVersion::FIRST)
            .is_err());
    }

    #[test]
    fn at_mem_backend_03_query_orders_and_limits() {
        let backend = InMemoryRecordBackend::from_records(vec![
            rec("1", "0xa", 2),
            rec("1", "0xa", 1),
            rec("2", "0xb", 1),
            rec("1", "0xa", 3),
        ])
        .unwrap();
        let id = ResourceId::new("1").unwrap();
        let latest = backend.query(&RecordQuery::latest_for_resource(&id)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version.get(), 3);
        let chain = backend.query(&RecordQuery::chain_for_resource(&id)).unwrap();
        let versions: Vec<u64> = chain.iter().map(|r| r.version.get()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        let owned = backend
            .query(&RecordQuery::by_owner(&OwnerAddress::new("0xB").unwrap()))
            .unwrap();
        assert_eq!(owned.len(), 1);
    }

    #[test]
    fn at_mem_backend_04_gapped_chain_is_rejected_on_load() {
        let err = InMemoryRecordBackend::from_records(vec![rec("1", "0xa", 1), rec("1", "0xa", 3)])
            .unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));
    }

    #[test]
    fn at_mem_backend_05_successor_must_keep_owner() {
        let mut backend = InMemoryRecordBackend::new();
        backend.create(rec("1", "0xa", 1)).unwrap();
        let err = backend
            .replace(rec("1", "0xb", 2), RecordVersion::FIRST)
            .unwrap_err();
        assert!(matches!(err, StorageError::OwnerMismatch { .. }));
        assert_eq!(backend.len(), 1);
        assert!(InMemoryRecordBackend::from_records(vec![rec("1", "0xa", 1), rec("1", "0xb", 2)])
            .is_err());
    }
}
