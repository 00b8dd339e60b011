#![forbid(unsafe_code)]

use ainft_contracts::memory_record::{
    OwnerAddress, RecordDraft, RecordVersion, ResourceId, MEMORY_NONCE_LEN,
};
use ainft_contracts::transition::TransitionKind;
use ainft_contracts::UnixTimeMs;
use ainft_storage::memory_backend::InMemoryRecordBackend;
use ainft_storage::{StorageError, VersionedRecordStore};

fn token(id: &str) -> ResourceId {
    ResourceId::new(id).unwrap()
}

fn owner() -> OwnerAddress {
    OwnerAddress::new("0xDbW0000000000000000000000000000000000001").unwrap()
}

fn draft(id: &str, fill: u8, t: u64) -> RecordDraft {
    RecordDraft::v1(
        token(id),
        owner(),
        vec![fill; 32],
        [fill; MEMORY_NONCE_LEN],
        format!("{:02x}", fill).repeat(32),
        UnixTimeMs(t),
    )
    .unwrap()
}

#[test]
fn at_records_db_01_chain_is_contiguous_from_one() {
    let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
    for (i, fill) in (1u8..=5).enumerate() {
        store.put(draft("1", fill, 100 + i as u64)).unwrap();
    }
    let chain = store.version_chain(&token("1")).unwrap();
    let versions: Vec<u64> = chain.iter().map(|r| r.version.get()).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    assert_eq!(
        store.get_latest(&token("1")).unwrap().unwrap().version.get(),
        5
    );
}

#[test]
fn at_records_db_02_resources_are_isolated() {
    let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
    store.put(draft("1", 1, 100)).unwrap();
    store.put(draft("1", 2, 101)).unwrap();
    let other = store.put(draft("2", 3, 102)).unwrap();
    assert_eq!(other.version, RecordVersion::FIRST);
    assert!(store.get_latest(&token("3")).unwrap().is_none());
    assert_eq!(store.list_by_owner(&owner()).unwrap().len(), 3);
}

#[test]
fn at_records_db_03_concurrent_writers_cannot_fork_a_version() {
    let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
    store.put(draft("1", 1, 100)).unwrap();

    // Both writers observe v1 and prepare v2.
    let first = store.prepare(draft("1", 2, 101)).unwrap();
    let second = store.prepare(draft("1", 3, 102)).unwrap();
    assert_eq!(first.kind, TransitionKind::Replace);
    assert_eq!(first.record.version, second.record.version);

    store.commit(first).unwrap();
    let err = store.commit(second).unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionConflict {
            expected: Some(1),
            found: Some(2),
            ..
        }
    ));

    // The loser re-reads and lands on v3.
    let retried = store.put(draft("1", 3, 103)).unwrap();
    assert_eq!(retried.version.get(), 3);
    let chain = store.version_chain(&token("1")).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[1].ciphertext, vec![2u8; 32]);
}

#[test]
fn at_records_db_04_history_is_never_rewritten() {
    let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
    let v1 = store.put(draft("1", 1, 100)).unwrap();
    store.put(draft("1", 2, 101)).unwrap();
    let err = store.put_if_version(None, draft("1", 9, 102)).unwrap_err();
    assert!(matches!(err, StorageError::VersionConflict { .. }));
    let chain = store.version_chain(&token("1")).unwrap();
    assert_eq!(chain[0], v1);
}
