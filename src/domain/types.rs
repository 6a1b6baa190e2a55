//! Domain types for quotes, signatures and trade outcomes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use tokio::time::Instant;
use uuid::Uuid;
use validator::Validate;

use super::envelope::SIGNATURE_LEN;
use super::error::{TradeFailure, ValidationError};

/// Wrapped SOL mint
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint (mainnet)
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Reserved prefix marking signatures produced by the degraded path.
/// Base58 has no `_`, so a real signature can never carry it.
pub const SIMULATED_SIGNATURE_PREFIX: &str = "sim_";

pub const DEFAULT_SLIPPAGE_BPS: u16 = 50;

/// Priority fee hint forwarded to the aggregator when building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PriorityFee {
    /// Let the aggregator estimate
    #[default]
    Auto,
    /// Fixed compute unit price, micro-lamports per CU
    ComputeUnitPrice(u64),
    /// Fixed total prioritization fee in lamports
    Lamports(u64),
}

impl FromStr for PriorityFee {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<u64>()
            .map(Self::ComputeUnitPrice)
            .map_err(|_| format!("expected 'auto' or micro-lamports per CU, got '{}'", s))
    }
}

/// Caller-supplied trade parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TradeParams {
    #[validate(length(min = 32, max = 44))]
    pub input_mint: String,
    #[validate(length(min = 32, max = 44))]
    pub output_mint: String,
    /// Input amount in base units
    #[validate(range(min = 1))]
    pub amount: u64,
    #[validate(range(max = 10_000))]
    pub slippage_bps: u16,
    #[validate(range(max = 18))]
    pub input_decimals: u8,
    #[validate(range(max = 18))]
    pub output_decimals: u8,
    #[serde(default = "default_true")]
    pub wrap_and_unwrap_sol: bool,
    #[serde(default)]
    pub priority_fee: Option<PriorityFee>,
}

fn default_true() -> bool {
    true
}

impl TradeParams {
    /// Defaults: 50 bps slippage, 9 input decimals, 6 output decimals
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>, amount: u64) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            input_decimals: 9,
            output_decimals: 6,
            wrap_and_unwrap_sol: true,
            priority_fee: None,
        }
    }

    #[must_use]
    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    #[must_use]
    pub fn with_decimals(mut self, input_decimals: u8, output_decimals: u8) -> Self {
        self.input_decimals = input_decimals;
        self.output_decimals = output_decimals;
        self
    }

    #[must_use]
    pub fn with_priority_fee(mut self, priority_fee: PriorityFee) -> Self {
        self.priority_fee = Some(priority_fee);
        self
    }

    /// Field validation plus mint address parsing
    pub fn check(&self) -> Result<(), ValidationError> {
        self.validate()
            .map_err(|e| ValidationError::Multiple(e.to_string()))?;
        parse_pubkey("input_mint", &self.input_mint)?;
        parse_pubkey("output_mint", &self.output_mint)?;
        if self.input_mint == self.output_mint {
            return Err(ValidationError::field(
                "output_mint",
                "input and output mints must differ",
            ));
        }
        Ok(())
    }
}

/// Parse a base58 account address, naming the field on failure
pub fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, ValidationError> {
    Pubkey::from_str(value)
        .map_err(|e| ValidationError::field(field, format!("'{}' is not a valid address: {}", value, e)))
}

/// Request sent to the aggregator's quote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub slippage_bps: u16,
    /// Restrict routing to what fits in a legacy transaction
    pub as_legacy_transaction: bool,
}

impl From<&TradeParams> for QuoteRequest {
    fn from(params: &TradeParams) -> Self {
        Self {
            input_mint: params.input_mint.clone(),
            output_mint: params.output_mint.clone(),
            amount: params.amount,
            slippage_bps: params.slippage_bps,
            as_legacy_transaction: false,
        }
    }
}

/// One hop of an aggregator route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub amm_key: String,
    pub label: Option<String>,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Share of the input routed through this hop
    pub percent: u8,
}

/// Quote contents as returned by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteDetails {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage
    pub other_amount_threshold: u64,
    pub slippage_bps: u16,
    /// Decimal string, e.g. "0.0012"
    pub price_impact_pct: String,
    pub route_plan: Vec<RouteHop>,
    pub context_slot: Option<u64>,
    /// Original response, echoed back verbatim when building
    pub raw: serde_json::Value,
}

/// Either a value or the aggregator's "no route" answer
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOutcome<Q = QuoteDetails> {
    Available(Q),
    Unavailable { reason: String },
}

impl<Q> QuoteOutcome<Q> {
    pub fn map<R>(self, f: impl FnOnce(Q) -> R) -> QuoteOutcome<R> {
        match self {
            Self::Available(q) => QuoteOutcome::Available(f(q)),
            Self::Unavailable { reason } => QuoteOutcome::Unavailable { reason },
        }
    }

    pub fn available(self) -> Option<Q> {
        match self {
            Self::Available(q) => Some(q),
            Self::Unavailable { .. } => None,
        }
    }
}

/// An issued quote with a bounded validity window. Immutable once issued.
#[derive(Debug, Clone)]
pub struct Quote {
    id: Uuid,
    details: QuoteDetails,
    issued_at: Instant,
    validity: Duration,
    expires_at: DateTime<Utc>,
}

impl Quote {
    pub fn issue(details: QuoteDetails, validity: Duration) -> Self {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(validity).unwrap_or_else(|_| chrono::Duration::seconds(30));
        Self {
            id: Uuid::now_v7(),
            details,
            issued_at: Instant::now(),
            validity,
            expires_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn details(&self) -> &QuoteDetails {
        &self.details
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Wall-clock expiry shown to callers
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    /// Monotonic instant at which the quote goes stale
    pub fn deadline(&self) -> Instant {
        self.issued_at + self.validity
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.age() >= self.validity
    }
}

/// Inputs for materializing a signable transaction from a quote
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub quote: &'a Quote,
    /// Fee payer, base58
    pub payer: &'a str,
    pub wrap_and_unwrap_sol: bool,
    pub priority_fee: PriorityFee,
    /// Ask the aggregator for a legacy transaction instead of v0
    pub prefer_legacy: bool,
}

/// Base58 signature returned by the network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature(String);

impl Signature {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let bytes = bs58::decode(value)
            .into_vec()
            .map_err(|e| ValidationError::field("signature", e.to_string()))?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(ValidationError::field(
                "signature",
                format!("expected {} bytes, got {}", SIGNATURE_LEN, bytes.len()),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn from_bytes(bytes: &[u8; SIGNATURE_LEN]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<solana_sdk::signature::Signature> for Signature {
    fn from(value: solana_sdk::signature::Signature) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<String> for Signature {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placeholder signature from the degraded path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulatedSignature(String);

impl SimulatedSignature {
    /// Deterministic per payload and attempt
    pub fn derive(payload: &[u8], attempt_id: Uuid) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.update(attempt_id.as_bytes());
        let digest = hasher.finalize();
        Self(format!(
            "{}{}",
            SIMULATED_SIGNATURE_PREFIX,
            bs58::encode(digest).into_string()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulatedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature attached to a trade: real, or synthetic from the degraded path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TxSignature {
    Real(Signature),
    Simulated(SimulatedSignature),
}

impl TxSignature {
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Real(s) => s.as_str(),
            Self::Simulated(s) => s.as_str(),
        }
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a signing capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Fee payer signature, which is also the transaction id
    pub signature: Signature,
    /// Fully signed wire bytes
    pub wire: Vec<u8>,
}

/// Per-attempt trade state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Unsigned,
    Signing,
    Submitted,
    Confirmed,
    Failed,
    DegradedSimulated,
    Succeeded,
}

impl TradeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Signing => "signing",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::DegradedSimulated => "degraded_simulated",
            Self::Succeeded => "succeeded",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Succeeded)
    }

    /// Allowed edges. A signer may refuse an encoding mid-signing, so
    /// `Signing -> DegradedSimulated` is legal too.
    #[must_use]
    pub fn can_transition_to(&self, next: TradeState) -> bool {
        use TradeState::*;
        matches!(
            (self, next),
            (Unsigned, Signing)
                | (Unsigned, DegradedSimulated)
                | (Unsigned, Failed)
                | (Signing, Submitted)
                | (Signing, DegradedSimulated)
                | (Signing, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
                | (DegradedSimulated, Succeeded)
        )
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of confirmation polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Reached the connection's commitment level
    Finalized { slot: u64 },
    /// Synthetic signature, nothing to poll
    Simulated,
    /// Landed, but the transaction itself failed
    OnChainError(String),
    TimedOut,
    /// Block height moved past the blockhash's validity
    BlockhashExpired,
}

/// Human-facing preview produced by `prepare`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradePreview {
    pub quote_id: Uuid,
    pub payer: String,
    pub input_amount: String,
    pub output_amount: String,
    pub minimum_received: String,
    pub price_impact_pct: String,
    pub slippage_bps: u16,
    pub route: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Quote plus preview, handed back to `execute_prepared` once confirmed
#[derive(Debug, Clone)]
pub struct TradeConfirmationData {
    pub params: TradeParams,
    pub quote: Quote,
    pub preview: TradePreview,
}

impl TradeConfirmationData {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.quote.expires_at()
    }
}

/// Terminal outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeResult {
    pub attempt_id: Uuid,
    pub success: bool,
    pub signature: Option<TxSignature>,
    /// Degraded path taken; nothing was submitted to the network
    pub simulated: bool,
    pub input_amount: String,
    pub output_amount: String,
    pub price_impact_pct: String,
    pub state: TradeState,
    /// States visited, in order
    pub history: Vec<TradeState>,
    pub error: Option<TradeFailure>,
    pub completed_at: DateTime<Utc>,
}

/// Render a base-unit amount with `decimals` places, trailing zeros trimmed
pub fn format_units(raw: u64, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let divisor = 10u128.pow(u32::from(decimals));
    let whole = u128::from(raw) / divisor;
    let frac = u128::from(raw) % divisor;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = usize::from(decimals));
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(1_000_000_000, 9), "1");
        assert_eq!(format_units(1_234_567, 6), "1.234567");
        assert_eq!(format_units(1_500, 6), "0.0015");
        assert_eq!(format_units(0, 6), "0");
        assert_eq!(format_units(42, 0), "42");
        assert_eq!(format_units(u64::MAX, 18), "18.446744073709551615");
    }

    #[test]
    fn test_trade_params_check() {
        let params = TradeParams::new(SOL_MINT, USDC_MINT, 1_000_000_000);
        assert!(params.check().is_ok());

        let zero = TradeParams::new(SOL_MINT, USDC_MINT, 0);
        assert!(matches!(zero.check(), Err(ValidationError::Multiple(_))));

        let same = TradeParams::new(SOL_MINT, SOL_MINT, 1);
        assert!(matches!(same.check(), Err(ValidationError::InvalidField { .. })));

        let bad_mint = TradeParams::new("1111111111111111111111111111111O0", USDC_MINT, 1);
        assert!(bad_mint.check().is_err());

        let slippage = TradeParams::new(SOL_MINT, USDC_MINT, 1).with_slippage_bps(10_001);
        assert!(slippage.check().is_err());
    }

    #[test]
    fn test_priority_fee_parse() {
        assert_eq!("auto".parse::<PriorityFee>(), Ok(PriorityFee::Auto));
        assert_eq!("AUTO".parse::<PriorityFee>(), Ok(PriorityFee::Auto));
        assert_eq!(
            "5000".parse::<PriorityFee>(),
            Ok(PriorityFee::ComputeUnitPrice(5000))
        );
        assert!("fast".parse::<PriorityFee>().is_err());
    }

    #[test]
    fn test_signature_parse() {
        let valid = bs58::encode([7u8; 64]).into_string();
        assert_eq!(Signature::parse(&valid).unwrap().as_str(), valid);
        assert!(Signature::parse(&bs58::encode([7u8; 32]).into_string()).is_err());
        assert!(Signature::parse("sim_abc").is_err());
    }

    #[test]
    fn test_simulated_signature_is_marked_and_deterministic() {
        let attempt = Uuid::new_v4();
        let a = SimulatedSignature::derive(b"payload", attempt);
        let b = SimulatedSignature::derive(b"payload", attempt);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with(SIMULATED_SIGNATURE_PREFIX));
        assert!(Signature::parse(a.as_str()).is_err());
        assert_ne!(a, SimulatedSignature::derive(b"payload", Uuid::new_v4()));
    }

    #[test]
    fn test_tx_signature_serialization_is_tagged() {
        let sig = TxSignature::Simulated(SimulatedSignature::derive(b"x", Uuid::nil()));
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["kind"], "simulated");
        assert!(sig.is_simulated());

        let real = TxSignature::Real(Signature::from_bytes(&[1u8; 64]));
        let json = serde_json::to_value(&real).unwrap();
        assert_eq!(json["kind"], "real");
        let back: TxSignature = serde_json::from_value(json).unwrap();
        assert_eq!(back, real);
    }

    #[test]
    fn test_trade_state_transitions() {
        use TradeState::*;
        assert!(Unsigned.can_transition_to(Signing));
        assert!(Signing.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Confirmed));
        assert!(Unsigned.can_transition_to(DegradedSimulated));
        assert!(DegradedSimulated.can_transition_to(Succeeded));
        assert!(!DegradedSimulated.can_transition_to(Submitted));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Unsigned.can_transition_to(Confirmed));
        assert!(Succeeded.is_terminal());
    }

    #[test]
    fn test_quote_outcome_map() {
        let outcome: QuoteOutcome<u32> = QuoteOutcome::Available(2);
        assert_eq!(outcome.map(|v| v * 2), QuoteOutcome::Available(4));
        let none: QuoteOutcome<u32> = QuoteOutcome::Unavailable {
            reason: "no route".to_string(),
        };
        assert_eq!(none.clone().available(), None);
        assert_eq!(
            none.map(|v| v + 1),
            QuoteOutcome::Unavailable {
                reason: "no route".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_quote_expires_after_validity_window() {
        let details = QuoteDetails {
            input_mint: SOL_MINT.to_string(),
            output_mint: USDC_MINT.to_string(),
            in_amount: 1,
            out_amount: 1,
            other_amount_threshold: 1,
            slippage_bps: 50,
            price_impact_pct: "0".to_string(),
            route_plan: vec![],
            context_slot: None,
            raw: serde_json::Value::Null,
        };
        let quote = Quote::issue(details, Duration::from_secs(30));
        assert!(!quote.is_expired());
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!quote.is_expired());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(quote.is_expired());
    }
}
