//! Environment-driven configuration.

use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use solana_commitment_config::CommitmentConfig;

use crate::app::ExecutorConfig;
use crate::domain::{ConfigError, PriorityFee};
use crate::infra::aggregator::{DEFAULT_JUPITER_URL, JupiterConfig};
use crate::infra::rpc::{Endpoint, RetryConfig, ThrottleConfig};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(ConfigError::invalid("LOG_FORMAT", format!("unknown format '{}'", other))),
        }
    }
}

/// Full configuration for the execution core
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_urls: Vec<Endpoint>,
    pub commitment: CommitmentConfig,
    pub rpc_timeout: Duration,
    pub throttle: ThrottleConfig,
    pub retry: RetryConfig,
    pub aggregator: JupiterConfig,
    pub executor: ExecutorConfig,
    pub log_format: LogFormat,
    /// Optional payer keypair for the preflight balance check
    pub payer_keypair: Option<SecretString>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_urls = Endpoint::parse_list(&get("SOLANA_RPC_URLS").unwrap_or_else(|| DEFAULT_RPC_URL.to_string()))?;
        if rpc_urls.is_empty() {
            return Err(ConfigError::Missing("SOLANA_RPC_URLS".to_string()));
        }
        let commitment = match get("SOLANA_COMMITMENT") {
            Some(value) => parse_commitment(&value)?,
            None => CommitmentConfig::confirmed(),
        };

        let rpc_timeout = Duration::from_secs(parse_or(&get, "RPC_TIMEOUT_SECS", 30u64)?);
        let throttle = ThrottleConfig {
            max_concurrent: parse_or(&get, "RPC_MAX_CONCURRENT", 5usize)?,
            min_interval: Duration::from_millis(parse_or(&get, "RPC_MIN_INTERVAL_MS", 100u64)?),
        };
        if throttle.max_concurrent == 0 {
            return Err(ConfigError::invalid("RPC_MAX_CONCURRENT", "must be at least 1"));
        }
        let retry = RetryConfig {
            max_retries: parse_or(&get, "RETRY_MAX_RETRIES", 5u32)?,
            rate_limit_base: Duration::from_millis(parse_or(&get, "RETRY_RATE_LIMIT_BASE_MS", 1000u64)?),
            transient_base: Duration::from_millis(parse_or(&get, "RETRY_TRANSIENT_BASE_MS", 500u64)?),
            ..RetryConfig::default()
        };

        let aggregator = JupiterConfig {
            base_url: get("AGGREGATOR_URL").unwrap_or_else(|| DEFAULT_JUPITER_URL.to_string()),
            api_key: get("AGGREGATOR_API_KEY").map(SecretString::from),
            timeout: rpc_timeout,
            requests_per_second: get("AGGREGATOR_REQUESTS_PER_SECOND")
                .map(|v| parse::<NonZeroU32>("AGGREGATOR_REQUESTS_PER_SECOND", &v))
                .transpose()?,
        };

        let executor = ExecutorConfig {
            quote_validity: Duration::from_secs(parse_or(&get, "QUOTE_VALIDITY_SECS", 30u64)?),
            confirmation_timeout: Duration::from_secs(parse_or(&get, "CONFIRMATION_TIMEOUT_SECS", 60u64)?),
            confirmation_poll: Duration::from_millis(parse_or(&get, "CONFIRMATION_POLL_MS", 500u64)?),
            simulated_latency: Duration::from_millis(parse_or(&get, "SIMULATED_LATENCY_MS", 1500u64)?),
            prefer_legacy: get("PREFER_LEGACY_TRANSACTIONS")
                .map(|v| parse_bool("PREFER_LEGACY_TRANSACTIONS", &v))
                .transpose()?
                .unwrap_or(false),
            priority_fee: match get("PRIORITY_FEE") {
                Some(value) => value
                    .parse()
                    .map_err(|e: String| ConfigError::invalid("PRIORITY_FEE", e))?,
                None => PriorityFee::Auto,
            },
            skip_preflight: get("SKIP_PREFLIGHT")
                .map(|v| parse_bool("SKIP_PREFLIGHT", &v))
                .transpose()?
                .unwrap_or(false),
        };

        let log_format = match get("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            rpc_urls,
            commitment,
            rpc_timeout,
            throttle,
            retry,
            aggregator,
            executor,
            log_format,
            payer_keypair: get("SOLANA_PAYER_KEYPAIR").map(SecretString::from),
        })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, format!("'{}': {}", value, e)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key).map(|v| parse(key, &v)).transpose().map(|v| v.unwrap_or(default))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("expected a boolean, got '{}'", other))),
    }
}

fn parse_commitment(value: &str) -> Result<CommitmentConfig, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "processed" => Ok(CommitmentConfig::processed()),
        "confirmed" => Ok(CommitmentConfig::confirmed()),
        "finalized" => Ok(CommitmentConfig::finalized()),
        other => Err(ConfigError::invalid(
            "SOLANA_COMMITMENT",
            format!("expected processed, confirmed or finalized, got '{}'", other),
        )),
    }
}
