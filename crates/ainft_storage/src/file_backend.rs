#![forbid(unsafe_code)]

use std::env;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use ainft_contracts::memory_record::{EncryptedRecord, RecordQuery, RecordVersion};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::MemoryDocument;
use crate::memory_backend::InMemoryRecordBackend;
use crate::record_store::{RecordBackend, StorageError};

const RECORD_FILE_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RecordFileDocument {
    schema_version: u8,
    documents: Vec<MemoryDocument>,
}

/// Record collaborator persisted as a single JSON document on local disk.
///
/// Every call re-reads the file. Writes hold an exclusive lock on a sidecar
/// `<file>.lock` from load to rename, so the version precondition holds across
/// handles and processes sharing the path.
#[derive(Debug, Clone)]
pub struct FileRecordBackend {
    path: PathBuf,
}

impl FileRecordBackend {
    pub fn default_local() -> Self {
        let path = env::var("AINFT_RECORD_FILE_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_record_path);
        Self::for_path(path)
    }

    pub fn for_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Exclusive advisory lock, released when the returned handle drops.
    fn lock_exclusive(&self) -> Result<File, StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock()?;
        Ok(lock)
    }

    /// Load, apply `write` and store, all under the exclusive lock.
    fn locked_update(
        &self,
        write: impl FnOnce(&mut InMemoryRecordBackend) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let _lock = self.lock_exclusive()?;
        let mut backend = self.load()?;
        write(&mut backend)?;
        self.store(&backend)
    }

    fn load(&self) -> Result<InMemoryRecordBackend, StorageError> {
        let Some(doc) = self.read_document()? else {
            return Ok(InMemoryRecordBackend::new());
        };
        let records = doc
            .documents
            .into_iter()
            .map(MemoryDocument::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        InMemoryRecordBackend::from_records(records)
    }

    fn store(&self, backend: &InMemoryRecordBackend) -> Result<(), StorageError> {
        let doc = RecordFileDocument {
            schema_version: RECORD_FILE_SCHEMA_VERSION,
            documents: backend.records().map(MemoryDocument::from_record).collect(),
        };
        self.write_document(&doc)
    }

    fn read_document(&self) -> Result<Option<RecordFileDocument>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Some(RecordFileDocument::default()));
        }
        let doc = serde_json::from_str::<RecordFileDocument>(&raw)?;
        if doc.schema_version != RECORD_FILE_SCHEMA_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported record file schema_version {}",
                doc.schema_version
            )));
        }
        Ok(Some(doc))
    }

    fn write_document(&self, doc: &RecordFileDocument) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(doc)?;
        atomic_write(&self.path, &serialized)?;
        debug!(
            path = %self.path.display(),
            documents = doc.documents.len(),
            "record file written"
        );
        Ok(())
    }
}

impl RecordBackend for FileRecordBackend {
    fn query(&self, query: &RecordQuery) -> Result<Vec<EncryptedRecord>, StorageError> {
        self.load()?.query(query)
    }

    fn create(&mut self, record: EncryptedRecord) -> Result<(), StorageError> {
        self.locked_update(|backend| backend.create(record))
    }

    fn replace(
        &mut self,
        record: EncryptedRecord,
        expected_prior: RecordVersion,
    ) -> Result<(), StorageError> {
        self.locked_update(|backend| backend.replace(record, expected_prior))
    }
}

fn default_record_path() -> PathBuf {
    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg_config_home)
            .join("ainft")
            .join("memory_records.json");
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("ainft")
            .join("memory_records.json");
    }
    PathBuf::from(".ainft").join("memory_records.json")
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}
