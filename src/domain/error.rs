//! Error taxonomy for the execution core.
//!
//! Transport failures are classified once, at the boundary where the response
//! arrives, into [`RpcError`]. Everything downstream matches on
//! [`ErrorClass`] instead of inspecting messages.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::envelope::EncodingVariant;

/// How the retry policy treats a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Provider is throttling us, long backoff
    RateLimit,
    /// Network or node hiccup, short backoff
    Transient,
    /// Not retried
    Fatal,
}

impl ErrorClass {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote call, already classified
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// HTTP 429 or an explicit rate-limit JSON-RPC code
    #[error("Rate limited by {endpoint}: {message}")]
    RateLimited { endpoint: String, message: String },

    /// Timeout, connection reset, gateway errors
    #[error("Network error at {endpoint}: {message}")]
    TransientNetwork { endpoint: String, message: String },

    /// Node-internal JSON-RPC codes that clear up on their own
    #[error("Node unavailable at {endpoint} (code {code}): {message}")]
    NodeUnavailable {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("RPC error: {message}")]
    Fatal { code: Option<i64>, message: String },

    /// Retries ran out; the last retryable error is kept for diagnostics
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<RpcError> },
}

impl RpcError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            code: None,
            message: message.into(),
        }
    }

    /// Classification used by the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::TransientNetwork { .. } | Self::NodeUnavailable { .. } => ErrorClass::Transient,
            Self::Fatal { .. } | Self::Exhausted { .. } => ErrorClass::Fatal,
        }
    }

    /// Class of the underlying failure, looking through exhaustion
    pub fn root_class(&self) -> ErrorClass {
        match self {
            Self::Exhausted { last, .. } => last.root_class(),
            other => other.class(),
        }
    }

    /// The node already holds this transaction, so an earlier send got through
    pub fn is_already_processed(&self) -> bool {
        match self {
            Self::Fatal { message, .. } => message.to_ascii_lowercase().contains("already been processed"),
            Self::Exhausted { last, .. } => last.is_already_processed(),
            _ => false,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::RateLimited { endpoint, .. }
            | Self::TransientNetwork { endpoint, .. }
            | Self::NodeUnavailable { endpoint, .. } => Some(endpoint),
            Self::Exhausted { last, .. } => last.endpoint(),
            Self::Fatal { .. } => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Input validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcomes reported by a signing capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// The user declined. Never retried.
    #[error("User rejected the request: {0}")]
    Rejected(String),

    #[error("Signer does not support {0} transactions")]
    UnsupportedEncoding(EncodingVariant),

    #[error("Signing failed: {0}")]
    Failed(String),
}

/// Application-level error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Aggregator error: {0}")]
    Aggregator(String),

    #[error("No route available: {0}")]
    QuoteUnavailable(String),

    #[error("Quote {quote_id} expired at {expired_at}")]
    QuoteExpired {
        quote_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Invalid transaction envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Signing rejected: {0}")]
    SigningRejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction {signature} not confirmed within {timeout:?}")]
    ConfirmationTimeout { signature: String, timeout: Duration },

    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("Blockhash expired before {signature} landed")]
    BlockhashExpired { signature: String },
}

impl From<SignerError> for AppError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Rejected(reason) => Self::SigningRejected(reason),
            other => Self::Signing(other.to_string()),
        }
    }
}

/// Failure categories surfaced inside a `TradeResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeFailureKind {
    InvalidRequest,
    Configuration,
    QuoteUnavailable,
    QuoteExpired,
    Aggregator,
    InvalidEnvelope,
    SigningRejected,
    SigningFailed,
    RateLimited,
    Network,
    Rpc,
    OnChain,
    ConfirmationTimeout,
    BlockhashExpired,
}

/// Typed, human-readable failure attached to a failed trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFailure {
    pub kind: TradeFailureKind,
    pub message: String,
}

impl From<&AppError> for TradeFailure {
    fn from(err: &AppError) -> Self {
        let kind = match err {
            AppError::Validation(_) => TradeFailureKind::InvalidRequest,
            AppError::Config(_) => TradeFailureKind::Configuration,
            AppError::Rpc(rpc) => match rpc.root_class() {
                ErrorClass::RateLimit => TradeFailureKind::RateLimited,
                ErrorClass::Transient => TradeFailureKind::Network,
                ErrorClass::Fatal => TradeFailureKind::Rpc,
            },
            AppError::Aggregator(_) => TradeFailureKind::Aggregator,
            AppError::QuoteUnavailable(_) => TradeFailureKind::QuoteUnavailable,
            AppError::QuoteExpired { .. } => TradeFailureKind::QuoteExpired,
            AppError::InvalidEnvelope(_) => TradeFailureKind::InvalidEnvelope,
            AppError::SigningRejected(_) => TradeFailureKind::SigningRejected,
            AppError::Signing(_) => TradeFailureKind::SigningFailed,
            AppError::ConfirmationTimeout { .. } => TradeFailureKind::ConfirmationTimeout,
            AppError::TransactionFailed(_) => TradeFailureKind::OnChain,
            AppError::BlockhashExpired { .. } => TradeFailureKind::BlockhashExpired,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> RpcError {
        RpcError::RateLimited {
            endpoint: "https://rpc.example".to_string(),
            message: "429 Too Many Requests".to_string(),
        }
    }

    #[test]
    fn test_rpc_error_classes() {
        assert_eq!(rate_limited().class(), ErrorClass::RateLimit);
        assert_eq!(
            RpcError::NodeUnavailable {
                endpoint: "e".to_string(),
                code: -32005,
                message: "Node is behind".to_string(),
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(RpcError::fatal("bad params").class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_exhausted_is_fatal_but_keeps_root_class() {
        let err = RpcError::Exhausted {
            attempts: 6,
            last: Box::new(rate_limited()),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(err.root_class(), ErrorClass::RateLimit);
        assert_eq!(err.endpoint(), Some("https://rpc.example"));
    }

    #[test]
    fn test_signer_rejection_maps_to_signing_rejected() {
        let err: AppError = SignerError::Rejected("user closed wallet".to_string()).into();
        assert!(matches!(err, AppError::SigningRejected(_)));

        let err: AppError = SignerError::Failed("device locked".to_string()).into();
        assert!(matches!(err, AppError::Signing(_)));
    }

    #[test]
    fn test_trade_failure_kind_from_exhausted_rate_limit() {
        let err = AppError::Rpc(RpcError::Exhausted {
            attempts: 6,
            last: Box::new(rate_limited()),
        });
        let failure = TradeFailure::from(&err);
        assert_eq!(failure.kind, TradeFailureKind::RateLimited);
        assert!(failure.message.contains("Gave up after 6 attempts"));
    }
}
