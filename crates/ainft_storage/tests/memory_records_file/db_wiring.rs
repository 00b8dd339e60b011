#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use ainft_contracts::memory_record::{OwnerAddress, RecordDraft, ResourceId, MEMORY_NONCE_LEN};
use ainft_contracts::UnixTimeMs;
use ainft_storage::file_backend::FileRecordBackend;
use ainft_storage::{StorageError, VersionedRecordStore};

fn temp_paths(name: &str) -> (PathBuf, PathBuf) {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let base = std::env::temp_dir().join(format!("ainft-record-file-{name}-{suffix}"));
    let path = base.join("memory_records.json");
    (base, path)
}

fn draft(id: &str, fill: u8) -> RecordDraft {
    RecordDraft::v1(
        ResourceId::new(id).unwrap(),
        OwnerAddress::new("0xf11e").unwrap(),
        vec![fill; 16],
        [fill; MEMORY_NONCE_LEN],
        format!("{:02x}", fill).repeat(32),
        UnixTimeMs(1_700_000_000_000 + fill as u64),
    )
    .unwrap()
}

#[test]
fn at_records_file_01_records_survive_reopen() {
    let (base, path) = temp_paths("reopen");
    {
        let mut store = VersionedRecordStore::new(FileRecordBackend::for_path(path.clone()));
        store.put(draft("5", 1)).unwrap();
        store.put(draft("5", 2)).unwrap();
    }
    let store = VersionedRecordStore::new(FileRecordBackend::for_path(path.clone()));
    let latest = store
        .get_latest(&ResourceId::new("5").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(latest.version.get(), 2);
    assert_eq!(latest.ciphertext, vec![2u8; 16]);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"encryptedMemory\""));
    assert!(raw.contains("\"schema_version\": 1"));
    fs::remove_dir_all(base).unwrap();
}

#[test]
fn at_records_file_02_two_handles_share_the_version_precondition() {
    let (base, path) = temp_paths("handles");
    let mut a = VersionedRecordStore::new(FileRecordBackend::for_path(path.clone()));
    let mut b = VersionedRecordStore::new(FileRecordBackend::for_path(path.clone()));
    a.put(draft("5", 1)).unwrap();

    let from_a = a.prepare(draft("5", 2)).unwrap();
    let from_b = b.prepare(draft("5", 3)).unwrap();
    a.commit(from_a).unwrap();
    assert!(matches!(
        b.commit(from_b),
        Err(StorageError::VersionConflict { .. })
    ));
    assert_eq!(
        b.version_chain(&ResourceId::new("5").unwrap()).unwrap().len(),
        2
    );
    fs::remove_dir_all(base).unwrap();
}

#[test]
fn at_records_file_03_concurrent_writers_never_share_a_version() {
    let (base, path) = temp_paths("race");
    let rounds = 40;
    let mut acknowledged: Vec<u64> = Vec::new();
    for round in 0..rounds {
        let barrier = Arc::new(Barrier::new(2));
        let writers: Vec<_> = (0..2u8)
            .map(|writer| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                thread::spawn(move || {
                    let mut store = VersionedRecordStore::new(FileRecordBackend::for_path(path));
                    barrier.wait();
                    store.put(draft("7", (round * 2 + writer as usize) as u8))
                })
            })
            .collect();
        let mut versions_this_round = Vec::new();
        for writer in writers {
            match writer.join().unwrap() {
                Ok(record) => versions_this_round.push(record.version.get()),
                Err(StorageError::VersionConflict { .. }) => {}
                Err(other) => panic!("round {round}: unexpected {other:?}"),
            }
        }
        assert!(!versions_this_round.is_empty(), "round {round}: no writer succeeded");
        acknowledged.extend(versions_this_round);
    }

    let store = VersionedRecordStore::new(FileRecordBackend::for_path(path.clone()));
    let chain: Vec<u64> = store
        .version_chain(&ResourceId::new("7").unwrap())
        .unwrap()
        .iter()
        .map(|r| r.version.get())
        .collect();
    let contiguous: Vec<u64> = (1..=chain.len() as u64).collect();
    assert_eq!(chain, contiguous);
    acknowledged.sort_unstable();
    assert_eq!(acknowledged, chain, "every acknowledged write is on disk exactly once");
    fs::remove_dir_all(base).unwrap();
}

