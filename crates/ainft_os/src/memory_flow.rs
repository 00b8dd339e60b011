#![forbid(unsafe_code)]

//! Memory write and read flows.
//!
//! Write: derive key -> seal -> prepare next version -> sign and verify the
//! transition -> conditional commit -> broadcast. A commit rejected with a version
//! conflict is re-prepared and re-signed once; a second conflict is surfaced. A
//! broadcast failure after the commit returns the signed payload with the error so
//! it can be re-sent without writing a new version.
//! Read: latest version -> derive key -> decrypt -> verify the plaintext hash.

use ainft_contracts::gateway::{BurnReceipt, BurnRequest, RetrievalResult, StorageQuota, StorageResult};
use ainft_contracts::memory_record::{
    DocumentId, EncryptedRecord, RecordDraft, RecordVersion, ResourceId,
};
use ainft_contracts::storage_uri::{StorageScheme, StorageUri};
use ainft_contracts::transition::TransitionState;
use ainft_contracts::UnixTimeMs;
use ainft_engines::key_derivation::derive_key;
use ainft_engines::memory_cipher::{encrypt, open_verified};
use ainft_engines::transaction_signer::{
    AttachedTransition, BroadcastEndpoint, CanonicalEncoding, PendingStateChange,
    SignatureVerifier, Signer,
};
use ainft_storage::record_store::PreparedWrite;
use ainft_storage::{RecordBackend, StorageError, VersionedRecordStore};
use tracing::{info, warn};

use crate::error::MemoryError;
use crate::session::{IdentityGateway, Session};

const MAX_COMMIT_ATTEMPTS: usize = 2;

/// Signing and broadcast capabilities a write runs against.
#[derive(Clone, Copy)]
pub struct WriteCapabilities<'a> {
    pub signer: &'a dyn Signer,
    pub verifier: &'a dyn SignatureVerifier,
    pub encoding: &'a dyn CanonicalEncoding,
    pub broadcast: &'a dyn BroadcastEndpoint,
}

/// A committed record whose signed transition has not been accepted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBroadcast {
    pub document_id: DocumentId,
    pub version: RecordVersion,
    pub storage_uri: StorageUri,
    /// Attached payload: signable bytes, key id, signature.
    pub payload: Vec<u8>,
}

impl PendingBroadcast {
    /// Send the stored payload again. On failure the pending write is handed back.
    pub fn rebroadcast(self, endpoint: &dyn BroadcastEndpoint) -> Result<StorageResult, MemoryError> {
        match endpoint.broadcast(&self.payload) {
            Ok(transition_hash) => {
                info!(
                    version = self.version.get(),
                    transition_hash = transition_hash.as_str(),
                    state = ?TransitionState::Confirmed,
                    "pending memory broadcast accepted"
                );
                Ok(StorageResult {
                    document_id: self.document_id,
                    version: self.version,
                    transition_hash,
                    storage_uri: self.storage_uri,
                })
            }
            Err(failure) => Err(MemoryError::BroadcastFailed {
                pending: Box::new(self),
                failure,
            }),
        }
    }
}

/// Encrypt `content` and store it as the next version of `resource_id`.
pub fn store_memory<B: RecordBackend>(
    session: &Session,
    store: &mut VersionedRecordStore<B>,
    caps: WriteCapabilities<'_>,
    owner_secret: &[u8],
    resource_id: &ResourceId,
    content: &str,
    now: UnixTimeMs,
) -> Result<StorageResult, MemoryError> {
    let key = derive_key(owner_secret, resource_id.as_str())?;
    let sealed = encrypt(content, &key)?;
    drop(key);
    let draft = RecordDraft::v1(
        resource_id.clone(),
        session.owner_address().clone(),
        sealed.ciphertext,
        sealed.nonce,
        sealed.hash,
        now,
    )?;

    let (record, transition) = commit_with_retry(session, store, caps, draft)?;
    let pending = PendingBroadcast {
        storage_uri: StorageUri::new(StorageScheme::Dash, record.document_id.as_str())?,
        document_id: record.document_id.clone(),
        version: record.version,
        payload: transition.payload().to_vec(),
    };
    match transition.broadcast(caps.broadcast) {
        Ok(transition_hash) => {
            info!(
                identity_id = session.identity_id(),
                resource_id = record.resource_id.as_str(),
                version = record.version.get(),
                transition_hash = transition_hash.as_str(),
                state = ?TransitionState::Confirmed,
                "memory stored"
            );
            Ok(StorageResult {
                document_id: pending.document_id,
                version: pending.version,
                transition_hash,
                storage_uri: pending.storage_uri,
            })
        }
        Err(failure) => {
            warn!(
                identity_id = session.identity_id(),
                resource_id = record.resource_id.as_str(),
                version = record.version.get(),
                error = %failure,
                state = ?TransitionState::Rejected,
                "memory committed, broadcast failed"
            );
            Err(MemoryError::BroadcastFailed {
                pending: Box::new(pending),
                failure,
            })
        }
    }
}

/// Store a new version of a memory that already exists; `NotFound` otherwise.
/// Earlier versions stay readable through the version chain.
pub fn update_memory<B: RecordBackend>(
    session: &Session,
    store: &mut VersionedRecordStore<B>,
    caps: WriteCapabilities<'_>,
    owner_secret: &[u8],
    resource_id: &ResourceId,
    content: &str,
    now: UnixTimeMs,
) -> Result<StorageResult, MemoryError> {
    if store.get_latest(resource_id)?.is_none() {
        return Err(MemoryError::NotFound {
            resource_id: resource_id.as_str().to_string(),
        });
    }
    store_memory(session, store, caps, owner_secret, resource_id, content, now)
}

fn commit_with_retry<B: RecordBackend>(
    session: &Session,
    store: &mut VersionedRecordStore<B>,
    caps: WriteCapabilities<'_>,
    draft: RecordDraft,
) -> Result<(EncryptedRecord, AttachedTransition), MemoryError> {
    let mut attempt = 1;
    loop {
        let prepared = store.prepare(draft.clone())?;
        let transition = authorize_write(session, caps, &prepared, store.schema_id())?;
        match store.commit(prepared) {
            Ok(record) => return Ok((record, transition)),
            Err(StorageError::VersionConflict {
                resource_id,
                expected,
                found,
            }) if attempt < MAX_COMMIT_ATTEMPTS => {
                warn!(
                    resource_id = resource_id.as_str(),
                    expected = ?expected,
                    found = ?found,
                    "version conflict, re-reading latest"
                );
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Build, sign, verify and attach the transition for a prepared write.
pub fn authorize_write(
    session: &Session,
    caps: WriteCapabilities<'_>,
    prepared: &PreparedWrite,
    schema_id: &str,
) -> Result<AttachedTransition, MemoryError> {
    let mut signed = PendingStateChange::for_record(prepared.kind, &prepared.record, schema_id)
        .extract_signable(caps.encoding)?
        .sign(caps.signer)?;
    signed.verify_signer(caps.verifier, session.owner_address())?;
    signed.set_owner_identity(session.identity_id());
    Ok(signed.attach())
}

/// Decrypt and verify the latest version of `resource_id`, if any exists.
pub fn retrieve_memory<B: RecordBackend>(
    session: &Session,
    store: &VersionedRecordStore<B>,
    owner_secret: &[u8],
    resource_id: &ResourceId,
) -> Result<Option<RetrievalResult>, MemoryError> {
    let Some(record) = store.get_latest(resource_id)? else {
        return Ok(None);
    };
    let result = open_record(owner_secret, record)?;
    info!(
        identity_id = session.identity_id(),
        resource_id = resource_id.as_str(),
        version = result.version.get(),
        "memory retrieved"
    );
    Ok(Some(result))
}

/// Decrypt every version of `resource_id`, oldest first.
pub fn retrieve_history<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    owner_secret: &[u8],
    resource_id: &ResourceId,
) -> Result<Vec<RetrievalResult>, MemoryError> {
    store
        .version_chain(resource_id)?
        .into_iter()
        .map(|record| open_record(owner_secret, record))
        .collect()
}

fn open_record(owner_secret: &[u8], record: EncryptedRecord) -> Result<RetrievalResult, MemoryError> {
    let key = derive_key(owner_secret, record.resource_id.as_str())?;
    let content = open_verified(&record.ciphertext, &record.nonce, &key, &record.integrity_hash)?;
    Ok(RetrievalResult {
        content,
        memory_hash: record.integrity_hash,
        version: record.version,
        timestamp: record.timestamp,
    })
}

pub fn records_by_owner<B: RecordBackend>(
    session: &Session,
    store: &VersionedRecordStore<B>,
) -> Result<Vec<EncryptedRecord>, MemoryError> {
    Ok(store.list_by_owner(session.owner_address())?)
}

pub fn quota(session: &Session, gateway: &dyn IdentityGateway) -> Result<StorageQuota, MemoryError> {
    Ok(gateway.storage_quota(session.owner_address())?)
}

/// Report an on-chain burn so the gateway credits the session's identity.
pub fn register_burn(
    session: &Session,
    gateway: &dyn IdentityGateway,
    amount: u64,
    tx_hash: &str,
) -> Result<BurnReceipt, MemoryError> {
    let request = BurnRequest {
        eth_address: session.owner_address().as_str().to_string(),
        amount: amount.to_string(),
        tx_hash: tx_hash.to_string(),
    };
    Ok(gateway.register_burn(&request)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{owner, signer, verifier, FakeGateway};
    use ainft_contracts::memory_record::{RecordQuery, RecordVersion};
    use ainft_contracts::transition::{SignerKeyId, TransitionReference};
    use ainft_engines::loopback::{LoopbackBroadcast, LoopbackSigner};
    use ainft_engines::memory_cipher::CipherError;
    use ainft_engines::transaction_signer::{CanonicalV1, NetworkFailure};
    use ainft_storage::memory_backend::InMemoryRecordBackend;
    use ainft_storage::record_store::document_id_for;

    const SECRET: &[u8] = &[0x42; 32];

    fn session() -> Session {
        Session::establish(&FakeGateway::default(), &signer()).unwrap()
    }

    fn token() -> ResourceId {
        ResourceId::new("42").unwrap()
    }

    /// Backend that lets a competing writer land just before each of our writes.
    #[derive(Default)]
    struct RacingBackend {
        inner: InMemoryRecordBackend,
        competing: Vec<EncryptedRecord>,
    }

    impl RacingBackend {
        fn race(&mut self) -> Result<(), StorageError> {
            if let Some(record) = self.competing.pop() {
                match record.version.get() {
                    1 => self.inner.create(record)?,
                    v => {
                        let prior = RecordVersion::new(v - 1)?;
                        self.inner.replace(record, prior)?
                    }
                }
            }
            Ok(())
        }
    }

    impl RecordBackend for RacingBackend {
        fn query(&self, query: &RecordQuery) -> Result<Vec<EncryptedRecord>, StorageError> {
            self.inner.query(query)
        }

        fn create(&mut self, record: EncryptedRecord) -> Result<(), StorageError> {
            self.race()?;
            self.inner.create(record)
        }

        fn replace(
            &mut self,
            record: EncryptedRecord,
            expected_prior: RecordVersion,
        ) -> Result<(), StorageError> {
            self.race()?;
            self.inner.replace(record, expected_prior)
        }
    }

    fn competing(version: u64) -> EncryptedRecord {
        let key = derive_key(SECRET, "42").unwrap();
        let sealed = encrypt("from another writer", &key).unwrap();
        let draft = RecordDraft::v1(
            token(),
            owner(),
            sealed.ciphertext,
            sealed.nonce,
            sealed.hash,
            UnixTimeMs(500 + version),
        )
        .unwrap();
        let version = RecordVersion::new(version).unwrap();
        let id = document_id_for("ainftStorage.storage", &draft, version).unwrap();
        EncryptedRecord::v1(draft, version, id).unwrap()
    }

    fn run_with<B: RecordBackend>(
        store: &mut VersionedRecordStore<B>,
        broadcast: &dyn BroadcastEndpoint,
        content: &str,
        now: u64,
    ) -> Result<StorageResult, MemoryError> {
        let signer = signer();
        let verifier = verifier();
        let caps = WriteCapabilities {
            signer: &signer,
            verifier: &verifier,
            encoding: &CanonicalV1,
            broadcast,
        };
        store_memory(&session(), store, caps, SECRET, &token(), content, UnixTimeMs(now))
    }

    #[test]
    fn at_flow_01_store_then_retrieve_follows_version_chain() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        let first = run_with(&mut store, &LoopbackBroadcast, "hello", 1_000).unwrap();
        assert_eq!(first.version, RecordVersion::FIRST);
        assert_eq!(first.storage_uri.scheme(), StorageScheme::Dash);
        assert_eq!(first.storage_uri.id(), first.document_id.as_str());
        assert!(first.transition_hash.as_str().starts_with("loopback:"));

        let got = retrieve_memory(&session(), &store, SECRET, &token()).unwrap().unwrap();
        assert_eq!(got.content, "hello");
        assert_eq!(got.version.get(), 1);

        let second = run_with(&mut store, &LoopbackBroadcast, "hello v2", 2_000).unwrap();
        assert_eq!(second.version.get(), 2);
        let got = retrieve_memory(&session(), &store, SECRET, &token()).unwrap().unwrap();
        assert_eq!(got.content, "hello v2");
        assert_eq!(got.version.get(), 2);
        assert_eq!(got.timestamp, UnixTimeMs(2_000));

        let history = retrieve_history(&store, SECRET, &token()).unwrap();
        let contents: Vec<&str> = history.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hello v2"]);
    }

    #[test]
    fn at_flow_02_different_secret_cannot_read() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        run_with(&mut store, &LoopbackBroadcast, "hello", 1_000).unwrap();
        let err = retrieve_memory(&session(), &store, &[0x43; 32], &token()).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::IntegrityFailure(CipherError::AuthenticityFailure)
                | MemoryError::IntegrityFailure(CipherError::HashMismatch)
        ));
    }

    #[test]
    fn at_flow_03_missing_resource_retrieves_none() {
        let store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        assert!(retrieve_memory(&session(), &store, SECRET, &token())
            .unwrap()
            .is_none());
    }

    #[test]
    fn at_flow_04_one_conflict_is_retried_on_fresh_version() {
        let backend = RacingBackend {
            competing: vec![competing(1)],
            ..RacingBackend::default()
        };
        let mut store = VersionedRecordStore::new(backend);
        let result = run_with(&mut store, &LoopbackBroadcast, "mine", 1_000).unwrap();
        assert_eq!(result.version.get(), 2);
        let chain = store.version_chain(&token()).unwrap();
        assert_eq!(chain.len(), 2);
        let latest = retrieve_memory(&session(), &store, SECRET, &token()).unwrap().unwrap();
        assert_eq!(latest.content, "mine");
    }

    #[test]
    fn at_flow_05_second_conflict_is_surfaced() {
        let backend = RacingBackend {
            competing: vec![competing(2), competing(1)],
            ..RacingBackend::default()
        };
        let mut store = VersionedRecordStore::new(backend);
        let err = run_with(&mut store, &LoopbackBroadcast, "mine", 1_000).unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(store.version_chain(&token()).unwrap().len(), 2);
    }

    #[test]
    fn at_flow_06_signer_for_other_address_is_rejected_before_commit() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        let impostor = LoopbackSigner::new(owner(), SignerKeyId(0), [0x99; 32]);
        let verifier = verifier();
        let caps = WriteCapabilities {
            signer: &impostor,
            verifier: &verifier,
            encoding: &CanonicalV1,
            broadcast: &LoopbackBroadcast,
        };
        let err = store_memory(&session(), &mut store, caps, SECRET, &token(), "x", UnixTimeMs(1))
            .unwrap_err();
        assert!(matches!(err, MemoryError::AuthenticationFailure(_)));
        assert!(store.backend().is_empty());
    }

    struct DownEndpoint;

    impl BroadcastEndpoint for DownEndpoint {
        fn broadcast(&self, _payload: &[u8]) -> Result<TransitionReference, NetworkFailure> {
            Err(NetworkFailure::new(
                "broadcast failed with http status 502",
                Some("bad gateway".to_string()),
            ))
        }
    }

    #[test]
    fn at_flow_07_broadcast_failure_returns_committed_write_for_resend() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        let err = run_with(&mut store, &DownEndpoint, "hello", 1_000).unwrap_err();
        let pending = match err {
            MemoryError::BroadcastFailed { pending, failure } => {
                assert_eq!(failure.diagnostic.as_deref(), Some("bad gateway"));
                *pending
            }
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(pending.version, RecordVersion::FIRST);
        let latest = store.get_latest(&token()).unwrap().unwrap();
        assert_eq!(latest.document_id, pending.document_id);

        let err = pending.clone().rebroadcast(&DownEndpoint).unwrap_err();
        assert_eq!(err.pending_broadcast(), Some(&pending));

        let expected_hash = format!(
            "loopback:{}",
            hex::encode(ainft_engines::transaction_signer::double_sha256(&pending.payload))
        );
        let result = pending.rebroadcast(&LoopbackBroadcast).unwrap();
        assert_eq!(result.version, RecordVersion::FIRST);
        assert_eq!(result.transition_hash.as_str(), expected_hash);
        assert_eq!(store.version_chain(&token()).unwrap().len(), 1);
    }

    #[test]
    fn at_flow_08_owner_listing_quota_and_burn() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        run_with(&mut store, &LoopbackBroadcast, "a", 1_000).unwrap();
        run_with(&mut store, &LoopbackBroadcast, "b", 2_000).unwrap();
        assert_eq!(records_by_owner(&session(), &store).unwrap().len(), 2);

        let gateway = FakeGateway::default();
        assert_eq!(quota(&session(), &gateway).unwrap().max_credits, 1_000);
        let receipt = register_burn(&session(), &gateway, 50, "0xfeed").unwrap();
        assert_eq!(receipt.total_credits, 300);
    }

    #[test]
    fn at_flow_09_update_requires_an_existing_memory() {
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        let signer = signer();
        let verifier = verifier();
        let caps = WriteCapabilities {
            signer: &signer,
            verifier: &verifier,
            encoding: &CanonicalV1,
            broadcast: &LoopbackBroadcast,
        };
        let err = update_memory(&session(), &mut store, caps, SECRET, &token(), "x", UnixTimeMs(1))
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { ref resource_id } if resource_id == "42"));
        assert!(store.backend().is_empty());

        run_with(&mut store, &LoopbackBroadcast, "first", 1_000).unwrap();
        let updated =
            update_memory(&session(), &mut store, caps, SECRET, &token(), "second", UnixTimeMs(2_000))
                .unwrap();
        assert_eq!(updated.version.get(), 2);
        let got = retrieve_memory(&session(), &store, SECRET, &token()).unwrap().unwrap();
        assert_eq!(got.content, "second");
    }
}
