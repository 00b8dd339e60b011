#![forbid(unsafe_code)]

use std::env;

use ainft_contracts::gateway::Network;
use ainft_contracts::memory_record::MEMORY_RECORD_SCHEMA_ID;

pub const HTTP_CONNECT_TIMEOUT_MS_DEFAULT: u64 = 5_000;
pub const HTTP_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 30_000;

const TESTNET_GATEWAY_URL: &str = "https://testnet-api.peg.gg";
const MAINNET_GATEWAY_URL: &str = "https://api.peg.gg";

const TESTNET_DAPI_ADDRESSES: &[&str] = &[
    "https://seed-1.testnet.networks.dash.org:1443",
    "https://seed-2.testnet.networks.dash.org:1443",
    "https://seed-3.testnet.networks.dash.org:1443",
];
const MAINNET_DAPI_ADDRESSES: &[&str] = &[
    "https://seed-1.mainnet.networks.dash.org:1443",
    "https://seed-2.mainnet.networks.dash.org:1443",
    "https://seed-3.mainnet.networks.dash.org:1443",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub network: Network,
    /// Registered data contract the memory documents live under, if known.
    pub data_contract_id: Option<String>,
    pub schema_id: String,
    pub gateway_url: String,
    pub dapi_addresses: Vec<String>,
    /// Base URL of the generic document API; falls back to the first DAPI address.
    pub record_api_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl StorageConfig {
    pub fn for_network(network: Network) -> Self {
        let (gateway, dapi) = match network {
            Network::Testnet => (TESTNET_GATEWAY_URL, TESTNET_DAPI_ADDRESSES),
            Network::Mainnet => (MAINNET_GATEWAY_URL, MAINNET_DAPI_ADDRESSES),
        };
        Self {
            network,
            data_contract_id: None,
            schema_id: MEMORY_RECORD_SCHEMA_ID.to_string(),
            gateway_url: gateway.to_string(),
            dapi_addresses: dapi.iter().map(|s| s.to_string()).collect(),
            record_api_url: None,
            connect_timeout_ms: HTTP_CONNECT_TIMEOUT_MS_DEFAULT,
            request_timeout_ms: HTTP_REQUEST_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let network = lookup("AINFT_NETWORK")
            .and_then(|v| Network::parse(&v))
            .unwrap_or(Network::Testnet);
        let mut config = Self::for_network(network);
        config.data_contract_id = lookup("AINFT_DATA_CONTRACT_ID").and_then(trim_non_empty);
        if let Some(url) = lookup("AINFT_GATEWAY_URL").and_then(trim_non_empty) {
            config.gateway_url = url;
        }
        if let Some(raw) = lookup("AINFT_DAPI_ADDRESSES") {
            let parsed: Vec<String> = raw
                .split(',')
                .filter_map(|s| trim_non_empty(s.to_string()))
                .collect();
            if !parsed.is_empty() {
                config.dapi_addresses = parsed;
            }
        }
        config.record_api_url = lookup("AINFT_RECORD_API_URL").and_then(trim_non_empty);
        config.connect_timeout_ms = bounded_ms(
            lookup("AINFT_HTTP_CONNECT_TIMEOUT_MS"),
            HTTP_CONNECT_TIMEOUT_MS_DEFAULT,
        );
        config.request_timeout_ms = bounded_ms(
            lookup("AINFT_HTTP_REQUEST_TIMEOUT_MS"),
            HTTP_REQUEST_TIMEOUT_MS_DEFAULT,
        );
        config
    }

    pub fn record_api_base(&self) -> Option<&str> {
        self.record_api_url
            .as_deref()
            .or_else(|| self.dapi_addresses.first().map(String::as_str))
    }
}

fn trim_non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn bounded_ms(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (100..=300_000).contains(v))
        .unwrap_or(default)
}
