#![forbid(unsafe_code)]

use std::env;
use std::io::{self, IsTerminal, Read};
use std::time::{SystemTime, UNIX_EPOCH};

use ainft_contracts::UnixTimeMs;
use ainft_os::http::HttpBroadcastEndpoint;
use ainft_os::StorageConfig;
use ainft_storage::file_backend::FileRecordBackend;
use ainft_storage::VersionedRecordStore;
use ainft_tools::memory_cli::{
    execute_uri_command, memory_authorize, memory_chain, memory_list, memory_retrieve,
    memory_store, memory_update, parse_owner_secret, LocalIdentity, LOCAL_IDENTITY_ID,
};
use ainft_tools::tx_cli::{tx_attach, tx_broadcast, tx_digest};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const USAGE: &str = "usage:
  ainft uri parse <uri>
  ainft uri format <scheme> <id>
  ainft memory store <owner> <token_id> <content...>
  ainft memory update <owner> <token_id> <content...>
  ainft memory authorize <owner> <token_id> <nonce> <expiry_ms>
  ainft memory retrieve <owner> <token_id>
  ainft memory list <owner>
  ainft memory chain <token_id>
  ainft tx digest <token_id>
  ainft tx attach <signable_hex> <signature_hex> <key_id>
  ainft tx broadcast <payload_hex>";

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AINFT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (Some(group), Some(subcommand)) = (args.first(), args.get(1)) else {
        return Err(USAGE.to_string());
    };
    let rest = &args[2..];
    let output = match group.as_str() {
        "uri" => execute_uri_command(subcommand, rest)?,
        "memory" => run_memory(subcommand, rest)?,
        "tx" => run_tx(subcommand, rest)?,
        _ => return Err(USAGE.to_string()),
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn run_memory(subcommand: &str, rest: &[String]) -> Result<String, String> {
    let mut store = VersionedRecordStore::new(FileRecordBackend::default_local());
    match (subcommand, rest) {
        ("store" | "update", [owner, token_id, content @ ..]) if !content.is_empty() => {
            let secret = read_owner_secret()?;
            let identity = LocalIdentity::new(owner, &identity_id(), &secret)?;
            let content = content.join(" ");
            if subcommand == "store" {
                memory_store(&mut store, &identity, &secret, token_id, &content, now_unix_ms())
            } else {
                memory_update(&mut store, &identity, &secret, token_id, &content, now_unix_ms())
            }
        }
        ("authorize", [owner, token_id, nonce, expiry]) => {
            let secret = read_owner_secret()?;
            let identity = LocalIdentity::new(owner, &identity_id(), &secret)?;
            memory_authorize(&store, &identity, token_id, nonce, expiry, now_unix_ms())
        }
        ("retrieve", [owner, token_id]) => {
            let secret = read_owner_secret()?;
            let identity = LocalIdentity::new(owner, &identity_id(), &secret)?;
            memory_retrieve(&store, &identity, &secret, token_id)
        }
        ("list", [owner]) => memory_list(&store, owner),
        ("chain", [token_id]) => memory_chain(&store, token_id),
        _ => Err(USAGE.to_string()),
    }
}

fn run_tx(subcommand: &str, rest: &[String]) -> Result<String, String> {
    match (subcommand, rest) {
        ("digest", [token_id]) => {
            let store = VersionedRecordStore::new(FileRecordBackend::default_local());
            tx_digest(&store, token_id)
        }
        ("attach", [signable, signature, key_id]) => tx_attach(signable, signature, key_id),
        ("broadcast", [payload]) => {
            let endpoint = HttpBroadcastEndpoint::from_config(&StorageConfig::from_env())
                .map_err(|e| format!("invalid broadcast config: {e:?}"))?;
            tx_broadcast(&endpoint, payload)
        }
        _ => Err(USAGE.to_string()),
    }
}

fn identity_id() -> String {
    env::var("AINFT_IDENTITY_ID").unwrap_or_else(|_| LOCAL_IDENTITY_ID.to_string())
}

fn read_owner_secret() -> Result<Zeroizing<Vec<u8>>, String> {
    let raw = if io::stdin().is_terminal() {
        Zeroizing::new(rpassword::prompt_password("Owner secret (hex):").map_err(|e| e.to_string())?)
    } else {
        let mut input = Zeroizing::new(String::new());
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| e.to_string())?;
        input
    };
    parse_owner_secret(&raw)
}

fn now_unix_ms() -> UnixTimeMs {
    UnixTimeMs(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1)
            .max(1),
    )
}
