#![forbid(unsafe_code)]

use std::time::Duration;

use ainft_contracts::gateway::{
    BurnReceipt, BurnRequest, IdentityLinkRequest, IdentityLinkResponse, StorageQuota,
};
use ainft_contracts::memory_record::{
    EncryptedRecord, FilterValue, OwnerAddress, RecordQuery, RecordVersion,
};
use ainft_contracts::transition::TransitionReference;
use ainft_contracts::ContractViolation;
use ainft_engines::transaction_signer::{BroadcastEndpoint, NetworkFailure};
use ainft_storage::document::MemoryDocument;
use ainft_storage::{RecordBackend, StorageError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::StorageConfig;
use crate::session::IdentityGateway;

const HTTP_CONFLICT: u16 = 409;

/// Raw result of one HTTP exchange, before it is mapped to a domain outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpOutcome {
    Success(String),
    Status(u16, String),
    Transport(String),
}

impl HttpOutcome {
    fn from_ureq(result: Result<ureq::Response, ureq::Error>) -> Self {
        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.into_string().unwrap_or_default();
                if (200..=299).contains(&status) {
                    HttpOutcome::Success(body)
                } else {
                    HttpOutcome::Status(status, body)
                }
            }
            Err(ureq::Error::Status(code, resp)) => {
                HttpOutcome::Status(code, resp.into_string().unwrap_or_default())
            }
            Err(ureq::Error::Transport(err)) => HttpOutcome::Transport(err.to_string()),
        }
    }
}

/// Success body, or a `NetworkFailure` carrying the response body as diagnostic.
pub fn expect_success(outcome: HttpOutcome, operation: &str) -> Result<String, NetworkFailure> {
    match outcome {
        HttpOutcome::Success(body) => Ok(body),
        HttpOutcome::Status(code, body) => Err(NetworkFailure::new(
            format!("{operation} failed with http status {code}"),
            Some(body),
        )),
        HttpOutcome::Transport(detail) => Err(NetworkFailure::new(
            format!("{operation} transport error"),
            Some(detail),
        )),
    }
}

pub fn decode_json<T: for<'de> Deserialize<'de>>(
    body: &str,
    operation: &str,
) -> Result<T, NetworkFailure> {
    serde_json::from_str(body).map_err(|err| {
        NetworkFailure::new(
            format!("{operation} returned an unreadable body: {err}"),
            Some(body.to_string()),
        )
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastResponse {
    transition_hash: String,
}

pub fn parse_transition_reference(body: &str) -> Result<TransitionReference, NetworkFailure> {
    let parsed: BroadcastResponse = decode_json(body, "broadcast")?;
    if parsed.transition_hash.trim().is_empty() {
        return Err(NetworkFailure::new(
            "broadcast returned an empty transition hash",
            Some(body.to_string()),
        ));
    }
    Ok(TransitionReference(parsed.transition_hash))
}

pub fn build_agent(config: &StorageConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
        .timeout_read(Duration::from_millis(config.request_timeout_ms))
        .timeout_write(Duration::from_millis(config.request_timeout_ms))
        .build()
}

fn parse_base(field: &'static str, raw: &str) -> Result<Url, ContractViolation> {
    let url = Url::parse(raw).map_err(|_| ContractViolation::InvalidValue {
        field,
        reason: "must be an absolute URL",
    })?;
    if url.cannot_be_a_base() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be a base URL",
        });
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[derive(Debug, Clone)]
pub struct HttpIdentityGateway {
    agent: ureq::Agent,
    base: Url,
}

impl HttpIdentityGateway {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ContractViolation> {
        Ok(Self {
            agent: build_agent(config),
            base: parse_base("storage_config.gateway_url", &config.gateway_url)?,
        })
    }
}

impl IdentityGateway for HttpIdentityGateway {
    fn link_identity(
        &self,
        request: &IdentityLinkRequest,
    ) -> Result<IdentityLinkResponse, NetworkFailure> {
        let url = endpoint(&self.base, &["identity", "link"]);
        debug!(url = %url, "identity link request");
        let outcome = HttpOutcome::from_ureq(self.agent.post(url.as_str()).send_json(request));
        decode_json(&expect_success(outcome, "identity link")?, "identity link")
    }

    fn storage_quota(&self, owner: &OwnerAddress) -> Result<StorageQuota, NetworkFailure> {
        let url = endpoint(&self.base, &["storage", "quota", owner.as_str()]);
        let outcome = HttpOutcome::from_ureq(self.agent.get(url.as_str()).call());
        decode_json(&expect_success(outcome, "storage quota")?, "storage quota")
    }

    fn register_burn(&self, request: &BurnRequest) -> Result<BurnReceipt, NetworkFailure> {
        let url = endpoint(&self.base, &["storage", "burn"]);
        let outcome = HttpOutcome::from_ureq(self.agent.post(url.as_str()).send_json(request));
        decode_json(&expect_success(outcome, "burn registration")?, "burn registration")
    }
}

/// Posts signed transitions to the first DAPI address that answers.
#[derive(Debug, Clone)]
pub struct HttpBroadcastEndpoint {
    agent: ureq::Agent,
    addresses: Vec<Url>,
}

impl HttpBroadcastEndpoint {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ContractViolation> {
        let addresses = config
            .dapi_addresses
            .iter()
            .map(|raw| parse_base("storage_config.dapi_addresses", raw))
            .collect::<Result<Vec<_>, _>>()?;
        if addresses.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "storage_config.dapi_addresses",
                reason: "must list at least one address",
            });
        }
        Ok(Self {
            agent: build_agent(config),
            addresses,
        })
    }
}

impl BroadcastEndpoint for HttpBroadcastEndpoint {
    fn broadcast(&self, payload: &[u8]) -> Result<TransitionReference, NetworkFailure> {
        let mut last_failure = NetworkFailure::new("no broadcast address configured", None);
        for address in &self.addresses {
            let url = endpoint(address, &["platform", "broadcastStateTransition"]);
            let outcome = HttpOutcome::from_ureq(
                self.agent
                    .post(url.as_str())
                    .set("content-type", "application/octet-stream")
                    .send_bytes(payload),
            );
            match outcome {
                // Only an unreachable node moves on to the next address.
                HttpOutcome::Transport(detail) => {
                    warn!(url = %url, detail = detail.as_str(), "broadcast address unreachable");
                    last_failure = NetworkFailure::new("broadcast transport error", Some(detail));
                }
                other => return parse_transition_reference(&expect_success(other, "broadcast")?),
            }
        }
        Err(last_failure)
    }
}

/// `RecordBackend` over the generic filtered document API.
#[derive(Debug, Clone)]
pub struct HttpRecordBackend {
    agent: ureq::Agent,
    base: Url,
    schema_id: String,
    data_contract_id: Option<String>,
}

impl HttpRecordBackend {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ContractViolation> {
        let raw = config
            .record_api_base()
            .ok_or(ContractViolation::InvalidValue {
                field: "storage_config.record_api_url",
                reason: "must be set when no DAPI address is configured",
            })?;
        Ok(Self {
            agent: build_agent(config),
            base: parse_base("storage_config.record_api_url", raw)?,
            schema_id: config.schema_id.clone(),
            data_contract_id: config.data_contract_id.clone(),
        })
    }

    fn post(&self, segments: &[&str], body: Value) -> HttpOutcome {
        let url = endpoint(&self.base, segments);
        debug!(url = %url, "document api request");
        let body = scoped_to_contract(body, self.data_contract_id.as_deref());
        HttpOutcome::from_ureq(self.agent.post(url.as_str()).send_json(body))
    }

    fn write(
        &mut self,
        record: &EncryptedRecord,
        expected_prior: Option<RecordVersion>,
    ) -> Result<(), StorageError> {
        let body = batch_body(&self.schema_id, record, expected_prior);
        match self.post(&["documents", "batch"], body) {
            HttpOutcome::Status(HTTP_CONFLICT, body) => Err(conflict_from_body(
                record.resource_id.as_str(),
                expected_prior,
                &body,
            )),
            other => {
                expect_success(other, "document batch").map_err(network_storage_error)?;
                Ok(())
            }
        }
    }
}

impl RecordBackend for HttpRecordBackend {
    fn query(&self, query: &RecordQuery) -> Result<Vec<EncryptedRecord>, StorageError> {
        let body = query_body(&self.schema_id, query);
        let text = expect_success(self.post(&["documents", "query"], body), "document query")
            .map_err(network_storage_error)?;
        parse_query_response(&text)
    }

    fn create(&mut self, record: EncryptedRecord) -> Result<(), StorageError> {
        self.write(&record, None)
    }

    fn replace(
        &mut self,
        record: EncryptedRecord,
        expected_prior: RecordVersion,
    ) -> Result<(), StorageError> {
        self.write(&record, Some(expected_prior))
    }
}

fn network_storage_error(f: NetworkFailure) -> StorageError {
    StorageError::Network {
        message: f.message,
        diagnostic: f.diagnostic,
    }
}

/// Pin a request body to a registered data contract, when one is configured.
pub fn scoped_to_contract(mut body: Value, data_contract_id: Option<&str>) -> Value {
    if let (Some(id), Some(fields)) = (data_contract_id, body.as_object_mut()) {
        fields.insert("dataContractId".to_string(), json!(id));
    }
    body
}

/// `{schemaId, where: [[field, op, value]], orderBy: [[field, dir]], limit}`.
pub fn query_body(schema_id: &str, query: &RecordQuery) -> Value {
    let clauses: Vec<Value> = query
        .filter
        .iter()
        .map(|clause| {
            let value = match &clause.value {
                FilterValue::Text(v) => json!(v),
                FilterValue::Integer(v) => json!(v),
            };
            json!([clause.field.as_str(), clause.operator.as_str(), value])
        })
        .collect();
    let mut body = json!({
        "schemaId": schema_id,
        "where": clauses,
    });
    if let Some((field, direction)) = query.order_by {
        body["orderBy"] = json!([[field.as_str(), direction.as_str()]]);
    }
    if let Some(limit) = query.limit {
        body["limit"] = json!(limit);
    }
    body
}

/// A create when `expected_prior` is absent, otherwise a replace conditioned on it.
pub fn batch_body(
    schema_id: &str,
    record: &EncryptedRecord,
    expected_prior: Option<RecordVersion>,
) -> Value {
    let document = MemoryDocument::from_record(record);
    match expected_prior {
        None => json!({
            "schemaId": schema_id,
            "create": [document],
            "replace": [],
            "delete": [],
        }),
        Some(prior) => json!({
            "schemaId": schema_id,
            "create": [],
            "replace": [{ "expectedVersion": prior.get(), "document": document }],
            "delete": [],
        }),
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<MemoryDocument>,
}

pub fn parse_query_response(body: &str) -> Result<Vec<EncryptedRecord>, StorageError> {
    let parsed: QueryResponse = serde_json::from_str(body)?;
    parsed
        .documents
        .into_iter()
        .map(MemoryDocument::into_record)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    current_version: Option<u64>,
}

pub fn conflict_from_body(
    resource_id: &str,
    expected_prior: Option<RecordVersion>,
    body: &str,
) -> StorageError {
    let found = serde_json::from_str::<ConflictBody>(body)
        .ok()
        .and_then(|b| b.current_version);
    StorageError::VersionConflict {
        resource_id: resource_id.to_string(),
        expected: expected_prior.map(RecordVersion::get),
        found,
    }
}
