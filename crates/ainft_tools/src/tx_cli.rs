#![forbid(unsafe_code)]

use ainft_contracts::memory_record::ResourceId;
use ainft_contracts::transition::{
    SignerKeyId, TransitionKind, TransitionSignature, TRANSITION_PROTOCOL_VERSION,
};
use ainft_engines::transaction_signer::{
    attach_signature, decode_signable_header, BroadcastEndpoint, CanonicalV1, PendingStateChange,
};
use ainft_storage::{RecordBackend, VersionedRecordStore};

/// Signable bytes and digest of the latest version of `token_id`, for an external wallet.
pub fn tx_digest<B: RecordBackend>(
    store: &VersionedRecordStore<B>,
    token_id: &str,
) -> Result<String, String> {
    let resource =
        ResourceId::new(token_id).map_err(|e| format!("invalid token id '{token_id}': {e:?}"))?;
    let record = store
        .get_latest(&resource)
        .map_err(|e| format!("lookup failed: {e}"))?
        .ok_or_else(|| format!("no memory stored for token {token_id}"))?;
    let kind = if record.version.get() == 1 {
        TransitionKind::Create
    } else {
        TransitionKind::Replace
    };
    let signable = PendingStateChange::for_record(kind, &record, store.schema_id())
        .extract_signable(&CanonicalV1)
        .map_err(|e| format!("record cannot be encoded: {e:?}"))?;
    Ok(format!(
        "version={}\nsignable={}\ndigest={}",
        record.version,
        hex::encode(signable.signable_bytes()),
        hex::encode(signable.digest())
    ))
}

fn decode_hex(field: &str, raw: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|_| format!("{field} must be hex encoded"))
}

/// Combine signable bytes with an externally produced signature.
pub fn tx_attach(signable_hex: &str, signature_hex: &str, key_id: &str) -> Result<String, String> {
    let signable = decode_hex("signable", signable_hex)?;
    let (kind, protocol_version) =
        decode_signable_header(&signable).map_err(|e| format!("invalid signable bytes: {e:?}"))?;
    if protocol_version != TRANSITION_PROTOCOL_VERSION {
        return Err(format!(
            "unsupported transition protocol version {protocol_version}"
        ));
    }
    let signature = TransitionSignature::from_slice(&decode_hex("signature", signature_hex)?)
        .map_err(|e| format!("invalid signature: {e:?}"))?;
    let key_id = key_id
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("key id must be 0..=255, got '{key_id}'"))?;
    let payload = attach_signature(&signable, &signature, SignerKeyId(key_id));
    let kind = match kind {
        TransitionKind::Create => "create",
        TransitionKind::Replace => "replace",
    };
    Ok(format!(
        "kind={kind}\nlen={}\npayload={}",
        payload.len(),
        hex::encode(payload)
    ))
}

pub fn tx_broadcast(endpoint: &dyn BroadcastEndpoint, payload_hex: &str) -> Result<String, String> {
    let payload = decode_hex("payload", payload_hex)?;
    let reference = endpoint.broadcast(&payload).map_err(|f| match f.diagnostic {
        Some(diagnostic) => format!("{}: {diagnostic}", f.message),
        None => f.message,
    })?;
    Ok(format!("transition_hash={}", reference.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_cli::{memory_store, parse_owner_secret, LocalIdentity, LOCAL_IDENTITY_ID};
    use ainft_contracts::UnixTimeMs;
    use ainft_engines::loopback::LoopbackBroadcast;
    use ainft_storage::memory_backend::InMemoryRecordBackend;

    #[test]
    fn at_tx_cli_01_attach_appends_key_id_and_signature() {
        // magic, kind 2, protocol 1, zero entries
        let signable = "0x41494e4654535431020000000100000000";
        let sig = "11".repeat(65);
        let out = tx_attach(signable, &sig, "7").unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("kind=replace"));
        assert_eq!(lines.next(), Some("len=83"));
        assert_eq!(
            lines.next(),
            Some(format!("payload={}07{sig}", &signable[2..]).as_str())
        );
        assert!(tx_attach(signable, "11", "7").is_err());
        assert!(tx_attach(signable, &sig, "256").is_err());
        assert!(tx_attach("aabbcc", &sig, "7").is_err());
        assert!(tx_attach("41494e4654535431020000000200000000", &sig, "7").is_err());
    }

    #[test]
    fn at_tx_cli_02_digest_reports_latest_version() {
        let secret = parse_owner_secret(&"cd".repeat(32)).unwrap();
        let identity = LocalIdentity::new("0xc2", LOCAL_IDENTITY_ID, &secret).unwrap();
        let mut store = VersionedRecordStore::new(InMemoryRecordBackend::new());
        assert!(tx_digest(&store, "9").is_err());
        memory_store(&mut store, &identity, &secret, "9", "note", UnixTimeMs(5)).unwrap();
        let out = tx_digest(&store, "9").unwrap();
        assert!(out.starts_with("version=1\nsignable=41494e4654535431"));
        let digest = out.lines().last().unwrap().trim_start_matches("digest=");
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn at_tx_cli_03_broadcast_prints_reference() {
        let out = tx_broadcast(&LoopbackBroadcast, "00ff").unwrap();
        assert!(out.starts_with("transition_hash=loopback:"));
        assert!(tx_broadcast(&LoopbackBroadcast, "xyz").is_err());
    }
}
