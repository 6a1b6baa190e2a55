//! Blockchain RPC capabilities routed through pool, gate and retry.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use solana_commitment_config::CommitmentConfig;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::endpoints::Endpoint;
use super::pool::{ConnectionPool, commitment_label};
use super::retry::{RetryOutcome, RetryPolicy};
use super::throttle::ThrottleGate;
use crate::domain::{ErrorClass, RpcError, Signature};

/// Outcome of `sendTransaction` after retries
#[derive(Debug)]
pub struct Submission {
    pub result: Result<Signature, RpcError>,
    /// Whether the transaction may have reached a node despite an error
    pub maybe_delivered: bool,
}

/// Blockhash plus the last block height at which it is still accepted
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    /// `None` once the block is rooted
    pub confirmations: Option<u64>,
    pub err: Option<Value>,
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    fn rank(label: &str) -> u8 {
        match label {
            "finalized" => 2,
            "confirmed" => 1,
            _ => 0,
        }
    }

    /// Whether the status has reached `commitment`
    #[must_use]
    pub fn satisfies(&self, commitment: CommitmentConfig) -> bool {
        let reached = match (&self.confirmation_status, self.confirmations) {
            (Some(status), _) => Self::rank(status),
            // rooted blocks report no confirmation count
            (None, None) => 2,
            (None, Some(_)) => 0,
        };
        reached >= Self::rank(commitment_label(commitment))
    }
}

/// Entry from `getSignaturesForAddress`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub err: Option<Value>,
    pub memo: Option<String>,
    pub block_time: Option<i64>,
    pub confirmation_status: Option<String>,
}

/// Filters for `getProgramAccounts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    fn to_json(&self) -> Value {
        match self {
            Self::DataSize(size) => json!({ "dataSize": size }),
            Self::Memcmp { offset, bytes } => json!({
                "memcmp": {
                    "offset": offset,
                    "bytes": bs58::encode(bytes).into_string(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAccount {
    pub pubkey: String,
    pub lamports: u64,
    pub owner: String,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[derive(Debug, Deserialize)]
struct RawProgramAccount {
    pubkey: String,
    account: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    lamports: u64,
    owner: String,
    /// `[payload, encoding]`
    data: (String, String),
    executable: bool,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// Result of probing one endpoint
#[derive(Debug)]
pub struct EndpointHealth {
    pub endpoint: Endpoint,
    pub slot: Result<u64, RpcError>,
    pub latency: Duration,
}

impl EndpointHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.slot.is_ok()
    }
}

/// Each attempt: take a connection (rotating when none is pinned), pass the
/// throttle gate, issue the call, release the admission. Backoff sleeps
/// happen outside the gate.
pub struct RpcClient {
    pool: Arc<ConnectionPool>,
    gate: Arc<ThrottleGate>,
    retry: RetryPolicy,
}

impl RpcClient {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, gate: Arc<ThrottleGate>, retry: RetryPolicy) -> Self {
        Self { pool, gate, retry }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn gate(&self) -> &Arc<ThrottleGate> {
        &self.gate
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.pool.commitment()
    }

    fn commitment_label(&self) -> &'static str {
        commitment_label(self.pool.commitment())
    }

    /// Raw call with the full retry report
    pub async fn call_with(&self, endpoint: Option<&Endpoint>, method: &str, params: Value) -> RetryOutcome<Value> {
        self.retry
            .execute(method, |attempt| {
                let params = params.clone();
                async move {
                    let connection = self.pool.connection(endpoint);
                    let token = self.gate.admit().await?;
                    debug!(endpoint = %connection.endpoint(), method, attempt, "RPC call");
                    let result = connection.request(method, params).await;
                    token.release();
                    result
                }
            })
            .await
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        let value = self.call_with(None, method, params).await.into_result()?;
        decode(method, value)
    }

    #[instrument(skip(self))]
    pub async fn get_balance(&self, address: &str) -> Result<u64, RpcError> {
        let result: WithContext<u64> = self
            .call("getBalance", json!([address, { "commitment": self.commitment_label() }]))
            .await?;
        Ok(result.value)
    }

    #[instrument(skip(self))]
    pub async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let result: WithContext<LatestBlockhash> = self
            .call("getLatestBlockhash", json!([{ "commitment": self.commitment_label() }]))
            .await?;
        Ok(result.value)
    }

    #[instrument(skip(self))]
    pub async fn get_slot(&self) -> Result<u64, RpcError> {
        self.call("getSlot", json!([{ "commitment": self.commitment_label() }]))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_block_height(&self) -> Result<u64, RpcError> {
        self.call("getBlockHeight", json!([{ "commitment": self.commitment_label() }]))
            .await
    }

    /// Submit signed wire bytes; the node returns the first signature
    pub async fn send_transaction(&self, wire: &[u8], skip_preflight: bool) -> Result<Signature, RpcError> {
        self.submit_transaction(wire, skip_preflight).await.result
    }

    /// Like [`send_transaction`](Self::send_transaction), and also tells
    /// whether a failed submission may still have reached a node
    #[instrument(skip(self, wire), fields(bytes = wire.len()))]
    pub async fn submit_transaction(&self, wire: &[u8], skip_preflight: bool) -> Submission {
        let params = json!([
            BASE64.encode(wire),
            {
                "encoding": "base64",
                "skipPreflight": skip_preflight,
                "preflightCommitment": self.commitment_label(),
                "maxRetries": 0,
            }
        ]);
        let outcome = self.call_with(None, "sendTransaction", params).await;
        // a timed out or dropped attempt may have been accepted before the error
        let transient_attempt = outcome.report.saw(ErrorClass::Transient);
        let result = outcome
            .result
            .and_then(|value| decode::<String>("sendTransaction", value))
            .and_then(|raw| {
                Signature::parse(&raw)
                    .map_err(|e| RpcError::fatal(format!("Node returned an invalid signature: {}", e)))
            });

        match &result {
            Ok(signature) => info!(signature = %signature, "Transaction submitted"),
            Err(e) => warn!(error = %e, transient_attempt, "Transaction submission failed"),
        }
        let maybe_delivered = match &result {
            Ok(_) => true,
            Err(e) => transient_attempt || e.is_already_processed(),
        };
        Submission { result, maybe_delivered }
    }

    #[instrument(skip(self))]
    pub async fn get_signature_statuses(&self, signatures: &[&str]) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
        let result: WithContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([signatures, { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(result.value)
    }

    #[instrument(skip(self))]
    pub async fn get_signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, RpcError> {
        self.call(
            "getSignaturesForAddress",
            json!([address, { "limit": limit.clamp(1, 1000), "commitment": self.commitment_label() }]),
        )
        .await
    }

    #[instrument(skip(self, filters), fields(filters = filters.len()))]
    pub async fn get_program_accounts(&self, program_id: &str, filters: &[AccountFilter]) -> Result<Vec<ProgramAccount>, RpcError> {
        let mut config = json!({
            "encoding": "base64",
            "commitment": self.commitment_label(),
        });
        if !filters.is_empty() {
            config["filters"] = Value::Array(filters.iter().map(AccountFilter::to_json).collect());
        }
        let raw: Vec<RawProgramAccount> = self
            .call("getProgramAccounts", json!([program_id, config]))
            .await?;

        raw.into_iter()
            .map(|entry| {
                let data = BASE64.decode(&entry.account.data.0).map_err(|e| {
                    RpcError::fatal(format!("Account {} data is not base64: {}", entry.pubkey, e))
                })?;
                Ok(ProgramAccount {
                    pubkey: entry.pubkey,
                    lamports: entry.account.lamports,
                    owner: entry.account.owner,
                    data,
                    executable: entry.account.executable,
                })
            })
            .collect()
    }

    /// `getSlot` against every endpoint, one attempt each, still gated
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Vec<EndpointHealth> {
        let mut report = Vec::with_capacity(self.pool.len());
        for endpoint in self.pool.endpoints() {
            let started = Instant::now();
            let slot = self.check_endpoint(endpoint).await;
            let latency = started.elapsed();
            match &slot {
                Ok(slot) => debug!(endpoint = %endpoint, slot, latency_ms = latency.as_millis() as u64, "Endpoint healthy"),
                Err(e) => warn!(endpoint = %endpoint, error = %e, "Endpoint unhealthy"),
            }
            report.push(EndpointHealth {
                endpoint: endpoint.clone(),
                slot,
                latency,
            });
        }
        report
    }

    async fn check_endpoint(&self, endpoint: &Endpoint) -> Result<u64, RpcError> {
        let connection = self.pool.connection(Some(endpoint));
        let token = self.gate.admit().await?;
        let result = connection
            .request("getSlot", json!([{ "commitment": self.commitment_label() }]))
            .await;
        token.release();
        decode("getSlot", result?)
    }
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> Result<R, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::fatal(format!("Failed to decode {} response: {}", method, e)))
}
