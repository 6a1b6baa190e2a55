//! Mock implementations for testing.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;

use super::{TEST_PAYER, sample_transaction};
use crate::domain::envelope::SIGNATURE_LEN;
use crate::domain::{
    AppError, BuildRequest, EncodingVariant, PriorityFee, QuoteDetails, QuoteOutcome, QuoteRequest,
    RouteHop, RpcError, Signature, SignedTransaction, SignerError, SwapAggregator, TransactionEnvelope,
    TransactionSigner,
};
use crate::infra::rpc::{Endpoint, RpcTransport, TransportFactory};

const MOCK_SLOT: u64 = 1_000;
const MOCK_BLOCK_HEIGHT: u64 = 500;
const MOCK_BLOCKHASH: &str = "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N";

/// Scriptable JSON-RPC transport.
///
/// Responses are looked up per method: queued responses first (FIFO), then a
/// fixed override, then a canned healthy-node answer.
pub struct MockRpcTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    fixed: Mutex<HashMap<String, Result<Value, RpcError>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRpcTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call sleeps for `latency` before answering
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            fixed: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn push_ok(&self, method: &str, value: Value) {
        self.push(method, Ok(value));
    }

    pub fn push_err(&self, method: &str, error: RpcError) {
        self.push(method, Err(error));
    }

    fn push(&self, method: &str, response: Result<Value, RpcError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_ok(&self, method: &str, value: Value) {
        self.fixed.lock().unwrap().insert(method.to_string(), Ok(value));
    }

    pub fn set_err(&self, method: &str, error: RpcError) {
        self.fixed.lock().unwrap().insert(method.to_string(), Err(error));
    }

    pub fn calls_for(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of requests observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        if let Some(response) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        if let Some(response) = self.fixed.lock().unwrap().get(method) {
            return response.clone();
        }
        default_response(method, params)
    }
}

impl Default for MockRpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn default_response(method: &str, params: &Value) -> Result<Value, RpcError> {
    let context = json!({ "slot": MOCK_SLOT });
    match method {
        "getSlot" => Ok(json!(MOCK_SLOT)),
        "getBlockHeight" => Ok(json!(MOCK_BLOCK_HEIGHT)),
        "getBalance" => Ok(json!({ "context": context, "value": 1_000_000_000u64 })),
        "getLatestBlockhash" => Ok(json!({
            "context": context,
            "value": { "blockhash": MOCK_BLOCKHASH, "lastValidBlockHeight": MOCK_BLOCK_HEIGHT + 150 }
        })),
        "sendTransaction" => {
            // the node answers with the fee payer signature from the wire bytes
            let wire = params
                .get(0)
                .and_then(Value::as_str)
                .and_then(|encoded| BASE64.decode(encoded).ok())
                .ok_or_else(|| RpcError::fatal("sendTransaction expects a base64 payload"))?;
            let transaction: VersionedTransaction = bincode::deserialize(&wire)
                .map_err(|e| RpcError::fatal(format!("failed to deserialize transaction: {}", e)))?;
            let signature = transaction
                .signatures
                .first()
                .ok_or_else(|| RpcError::fatal("transaction carries no signature"))?;
            Ok(json!(signature.to_string()))
        }
        "getSignatureStatuses" => {
            let count = params.get(0).and_then(Value::as_array).map_or(0, Vec::len);
            let statuses: Vec<Value> = (0..count)
                .map(|_| {
                    json!({
                        "slot": MOCK_SLOT,
                        "confirmations": null,
                        "err": null,
                        "confirmationStatus": "finalized"
                    })
                })
                .collect();
            Ok(json!({ "context": context, "value": statuses }))
        }
        "getSignaturesForAddress" | "getProgramAccounts" => Ok(json!([])),
        other => Err(RpcError::Fatal {
            code: Some(-32601),
            message: format!("Method not found: {}", other),
        }),
    }
}

#[async_trait]
impl RpcTransport for MockRpcTransport {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        *self.calls.lock().unwrap().entry(method.to_string()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = self.next_response(method, &params);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Hands the same mock transport to every pooled connection
pub struct MockTransportFactory {
    transport: Arc<MockRpcTransport>,
    created: AtomicUsize,
}

impl MockTransportFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(Arc::new(MockRpcTransport::new()))
    }

    #[must_use]
    pub fn with_transport(transport: Arc<MockRpcTransport>) -> Self {
        Self {
            transport,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of connections the pool has asked for
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &Arc<MockRpcTransport> {
        &self.transport
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, _endpoint: &Endpoint) -> Arc<dyn RpcTransport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.transport.clone()
    }
}

/// What the aggregator was asked to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBuild {
    pub payer: String,
    pub prefer_legacy: bool,
    pub priority_fee: PriorityFee,
    pub wrap_and_unwrap_sol: bool,
}

/// Aggregator returning a fixed SOL/USDC-like route
pub struct MockAggregator {
    no_route: Option<String>,
    encoding: EncodingVariant,
    last_valid_block_height: Option<u64>,
    quote_calls: AtomicUsize,
    build_calls: AtomicUsize,
    last_quote: Mutex<Option<QuoteRequest>>,
    last_build: Mutex<Option<RecordedBuild>>,
}

impl MockAggregator {
    pub const OUT_AMOUNT: u64 = 150_250_000;
    pub const MIN_OUT_AMOUNT: u64 = 149_498_750;

    #[must_use]
    pub fn new() -> Self {
        Self {
            no_route: None,
            encoding: EncodingVariant::V0,
            last_valid_block_height: Some(MOCK_BLOCK_HEIGHT + 500),
            quote_calls: AtomicUsize::new(0),
            build_calls: AtomicUsize::new(0),
            last_quote: Mutex::new(None),
            last_build: Mutex::new(None),
        }
    }

    /// Every quote answers "no route" with `code`
    #[must_use]
    pub fn without_route(mut self, code: impl Into<String>) -> Self {
        self.no_route = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: EncodingVariant) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_last_valid_block_height(mut self, height: u64) -> Self {
        self.last_valid_block_height = Some(height);
        self
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    pub fn last_quote_request(&self) -> Option<QuoteRequest> {
        self.last_quote.lock().unwrap().clone()
    }

    pub fn last_build(&self) -> Option<RecordedBuild> {
        self.last_build.lock().unwrap().clone()
    }
}

impl Default for MockAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapAggregator for MockAggregator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteOutcome<QuoteDetails>, AppError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_quote.lock().unwrap() = Some(request.clone());

        if let Some(code) = &self.no_route {
            return Ok(QuoteOutcome::Unavailable {
                reason: code.clone(),
            });
        }

        let raw = json!({
            "inputMint": request.input_mint,
            "outputMint": request.output_mint,
            "inAmount": request.amount.to_string(),
            "outAmount": Self::OUT_AMOUNT.to_string(),
            "otherAmountThreshold": Self::MIN_OUT_AMOUNT.to_string(),
            "slippageBps": request.slippage_bps,
            "priceImpactPct": "0.0012",
        });
        Ok(QuoteOutcome::Available(QuoteDetails {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: request.amount,
            out_amount: Self::OUT_AMOUNT,
            other_amount_threshold: Self::MIN_OUT_AMOUNT,
            slippage_bps: request.slippage_bps,
            price_impact_pct: "0.0012".to_string(),
            route_plan: vec![RouteHop {
                amm_key: "HJPjoWUrhoZzkNfRpHuieeFk9WcZWjwy6PBjZ81ngndJ".to_string(),
                label: Some("Mock AMM".to_string()),
                input_mint: request.input_mint.clone(),
                output_mint: request.output_mint.clone(),
                in_amount: request.amount,
                out_amount: Self::OUT_AMOUNT,
                percent: 100,
            }],
            context_slot: Some(MOCK_SLOT),
            raw,
        }))
    }

    async fn build_swap(&self, request: &BuildRequest<'_>) -> Result<TransactionEnvelope, AppError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_build.lock().unwrap() = Some(RecordedBuild {
            payer: request.payer.to_string(),
            prefer_legacy: request.prefer_legacy,
            priority_fee: request.priority_fee,
            wrap_and_unwrap_sol: request.wrap_and_unwrap_sol,
        });

        let payer = Pubkey::from_str(request.payer)
            .map_err(|_| AppError::Aggregator(format!("invalid payer {}", request.payer)))?;
        TransactionEnvelope::from_bytes(
            sample_transaction(self.encoding, &payer),
            self.last_valid_block_height,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignBehavior {
    Sign,
    Reject,
    UnsupportedWhenSigning,
    Fail,
}

/// Wallet stand-in that writes a fixed signature
pub struct MockSigner {
    payer: String,
    legacy_only: bool,
    behavior: SignBehavior,
    sign_calls: AtomicUsize,
}

impl MockSigner {
    const SIGNATURE: [u8; SIGNATURE_LEN] = [7u8; SIGNATURE_LEN];

    #[must_use]
    pub fn new() -> Self {
        Self::with_behavior(SignBehavior::Sign)
    }

    fn with_behavior(behavior: SignBehavior) -> Self {
        Self {
            payer: TEST_PAYER.to_string(),
            legacy_only: false,
            behavior,
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// The user declines every request
    #[must_use]
    pub fn rejecting() -> Self {
        Self::with_behavior(SignBehavior::Reject)
    }

    /// Claims support up front, then refuses the encoding while signing
    #[must_use]
    pub fn unsupported_when_signing() -> Self {
        Self::with_behavior(SignBehavior::UnsupportedWhenSigning)
    }

    #[must_use]
    pub fn failing() -> Self {
        Self::with_behavior(SignBehavior::Fail)
    }

    #[must_use]
    pub fn legacy_only(mut self) -> Self {
        self.legacy_only = true;
        self
    }

    /// Signature this signer writes into every transaction
    pub fn signature(&self) -> Signature {
        Signature::from_bytes(&Self::SIGNATURE)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    fn payer(&self) -> String {
        self.payer.clone()
    }

    fn supports(&self, encoding: EncodingVariant) -> bool {
        !self.legacy_only || encoding.is_legacy()
    }

    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTransaction, SignerError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            SignBehavior::Reject => Err(SignerError::Rejected("user declined".to_string())),
            SignBehavior::UnsupportedWhenSigning => Err(SignerError::UnsupportedEncoding(envelope.encoding())),
            SignBehavior::Fail => Err(SignerError::Failed("device disconnected".to_string())),
            SignBehavior::Sign => {
                let wire = envelope
                    .with_signature(0, &Self::SIGNATURE)
                    .map_err(|e| SignerError::Failed(e.to_string()))?;
                Ok(SignedTransaction {
                    signature: self.signature(),
                    wire,
                })
            }
        }
    }
}
