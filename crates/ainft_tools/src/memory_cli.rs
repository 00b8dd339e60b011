#![forbid(unsafe_code)]

use ainft_contracts::gateway::StorageResult;
use ainft_contracts::memory_record::{OwnerAddress, ResourceId};
use ainft_contracts::storage_uri::{StorageScheme, StorageUri};
use ainft_contracts::transition::SignerKeyId;
use ainft_contracts::UnixTimeMs;
use ainft_engines::key_derivation::derive_key;
use ainft_engines::loopback::{LoopbackBroadcast, LoopbackSigner, LoopbackVerifier};
use ainft_engines::transaction_signer::CanonicalV1;
use ainft_os::authorization::{
    sign_storage_authorization, storage_auth_for_record, verify_storage_authorization,
};
use ainft_os::memory_flow::{self, WriteCapabilities};
use ainft_os::Session;
use ainft_storage::{RecordBackend, VersionedRecordStore};
use zeroize::Zeroizing;

pub const LOCAL_IDENTITY_ID: &str = "local";

pub fn execute_uri_command(subcommand: &str, args: &[String]) -> Result<String, String> {
    match subcommand {
        "parse" => {
            let raw = args
                .first()
                .ok_or_else(|| "usage: ainft uri parse <uri>".to_string())?;
            let uri = StorageUri::parse(raw).map_err(|e| e.to_string())?;
            Ok(format!(
                "scheme={}\nid={}\ncontent_addressed={}",
                uri.scheme().as_str(),
                uri.id(),
                uri.scheme().is_content_addressed()
            ))
        }
        "format" => {
            let (Some(scheme_raw), Some(id)) = (args.first(), args.get(1)) else {
                return Err("usage: ainft uri format <scheme> <id>".to_string());
            };
            let scheme = StorageScheme::parse(scheme_raw).ok_or_else(|| {
                let allowed: Vec<&str> = StorageScheme::all().iter().map(|s| s.as_str()).collect();
                format!("unknown scheme '{scheme_raw}'. allowed: {}", allowed.join(", "))
            })?;
            let uri = StorageUri::new(scheme, id.as_str()).map_err(|e| e.to_string())?;
            Ok(uri.format())
        }
        _ => Err(format!(
            "unknown uri subcommand: {subcommand}. expected one of: parse, format"
        )),
    }
}

/// Hex owner secret, `0x` prefix optional.
pub fn parse_owner_secret(raw: &str) -> Result<Zeroizing<Vec<u8>>, String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.is_empty() {
        return Err("owner secret must not be empty".to_string());
    }
    hex::decode(digits)
        .map(Zeroizing::new)
        .map_err(|_| "owner secret must be hex encoded".to_string())
}

/// Session and loopback signing keyed from the owner secret, for local stores.
pub struct LocalIdentity {
    session: Session,
    signer: LoopbackSigner,
    verifier: LoopbackVerifier,
}

impl LocalIdentity {
    pub fn new(owner_raw: &str, identity_id: &str, secret: &[u8]) -> Result<Self, String> {
        let owner = OwnerAddress::new(owner_raw).map_err(|e| format!("invalid owner: {e:?}"))?;
        let seed_key = derive_key(secret, &format!("local-signer:{}", owner.as_str()))
            .map_err(|e| e.to_string())?;
        let seed = Zeroizing::new(*seed_key.as_bytes());
        let session = Session::resume(identity_id, owner.clone())
            .map_err(|e| format!("invalid identity: {e:?}"))?;
        Ok(Self {
            session,
            signer: LoopbackSigner::new(owner.clone(), SignerKeyId(0), *seed),
            verifier: LoopbackVerifier::new(vec![(owner, *seed)]),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn capabilities(&self) -> WriteCapabilities<'_> {
        WriteCapabilities {
            signer: &self.signer,
            verifier: &self.verifier,
            encoding: &CanonicalV1,
            broadcast: &LoopbackBroadcast,
        }
    }
}

fn resource(raw: &str) -> Result<ResourceId, String> {
    ResourceId::new(raw).map_err(|e| format!("invalid token id '{raw}': {e:?}"))
}

pub fn memory_store<B: RecordBackend>(
    store: &mut VersionedRecordStore<B>,
    identity: &LocalIdentity,
    secret: &[u8],
    token_id: &str,
    content: &str,
    now: UnixTimeMs,
) -> Result<String, String> {
    let result = memory_flow::store_memory(
        &identity.session,
        store,
        identity.capabilities(),
        secret,
        &resource(token_id)?,
        content,
        now,
    )
    .map_err(|e| format!("store failed: {e}"))?;
    Ok(render_stored(&result))
}

/// Like `memory_store`, but refuses tokens with no stored memory.
pub fn memory_update<B: RecordBackend>(
    store: &mut VersionedRecordStore<B>,
    identity: &LocalIdentity,
    secret: &[u8],
    token_id: &str,
    content: &str,
    now: UnixTimeMs,
) -> Result<String, String> {
    let result = memory_flow::update_memory(
        &identity.session,
        store,
        identity.capabilities(),
        secret,
        &resource(token_id)?,
        content,
        now,
    )
    .map_err(|e| format!("update failed: {e}"))?;
    Ok(render_stored(&result))
}

fn render_stored(result: &StorageResult) -> String {
    format!(
        "version={}\ndocument_id={}\nuri={}\ntransition={}",
        result.version,
        result.document_id.as_str(),
        result.storage_uri,
        result.transition_hash.as_str()
    )
}

/// Signed relayer authorization for the latest version of `token_id`.
pub fn memory_authorize<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    identity: &LocalIdentity,
    token_id: &str,
    nonce_raw: &str,
    expiry_raw: &str,
    now: UnixTimeMs,
) -> Result<String, String> {
    let nonce = nonce_raw
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("nonce must be an unsigned integer, got '{nonce_raw}'"))?;
    let expiry = expiry_raw
        .trim()
        .parse::<u64>()
        .map(UnixTimeMs)
        .map_err(|_| format!("expiry must be unix milliseconds, got '{expiry_raw}'"))?;
    let record = store
        .get_latest(&resource(token_id)?)
        .map_err(|e| format!("lookup failed: {e}"))?
        .ok_or_else(|| format!("no memory stored for token {token_id}"))?;
    let message = storage_auth_for_record(&identity.session, &record, nonce, expiry)
        .map_err(|e| format!("authorization failed: {e}"))?;
    let signature = sign_storage_authorization(&identity.signer, &message)
        .map_err(|e| format!("authorization failed: {e}"))?;
    verify_storage_authorization(
        &identity.verifier,
        &message,
        &signature,
        identity.session.owner_address(),
        now,
    )
    .map_err(|e| format!("authorization failed: {e}"))?;
    Ok(format!(
        "message={}\nsignature={}",
        message.render(),
        hex::encode(signature.as_bytes())
    ))
}

pub fn memory_retrieve<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    identity: &LocalIdentity,
    secret: &[u8],
    token_id: &str,
) -> Result<String, String> {
    let found = memory_flow::retrieve_memory(&identity.session, store, secret, &resource(token_id)?)
        .map_err(|e| format!("retrieve failed: {e}"))?;
    match found {
        Some(result) => Ok(format!(
            "version={}\nmemory_hash={}\ntimestamp={}\n{}",
            result.version, result.memory_hash, result.timestamp.0, result.content
        )),
        None => Err(format!("no memory stored for token {token_id}")),
    }
}

pub fn memory_list<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    owner_raw: &str,
) -> Result<String, String> {
    let owner = OwnerAddress::new(owner_raw).map_err(|e| format!("invalid owner: {e:?}"))?;
    let records = store
        .list_by_owner(&owner)
        .map_err(|e| format!("list failed: {e}"))?;
    Ok(records
        .iter()
        .map(|r| {
            format!(
                "{} v{} {}",
                r.resource_id.as_str(),
                r.version,
                r.document_id.as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn memory_chain<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    token_id: &str,
) -> Result<String, String> {
    let chain = store
        .version_chain(&resource(token_id)?)
        .map_err(|e| format!("chain failed: {e}"))?;
    Ok(chain
        .iter()
        .map(|r| format!("v{} {} {}", r.version, r.timestamp.0, r.integrity_hash))
        .collect::<Vec<_>>()
        .join("\n"))
}
