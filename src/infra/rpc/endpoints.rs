//! RPC endpoints and round-robin rotation.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::Url;

use crate::domain::ConfigError;

/// Remote RPC provider address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| ConfigError::invalid("SOLANA_RPC_URLS", format!("'{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "SOLANA_RPC_URLS",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::invalid("SOLANA_RPC_URLS", format!("'{}' has no host", raw)));
        }
        Ok(Self { url })
    }

    /// Parse a comma-separated list, skipping blanks
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ConfigError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Full URL, including any credentials in the query string
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Logs the URL without its query string, where providers put API keys
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.url.scheme(), self.url.host_str().unwrap_or_default())?;
        if let Some(port) = self.url.port() {
            write!(f, ":{}", port)?;
        }
        f.write_str(self.url.path().trim_end_matches('/'))
    }
}

/// Hands out endpoints round-robin, wrapping after the last
#[derive(Debug)]
pub struct EndpointRotator {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

impl EndpointRotator {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::Missing("at least one RPC endpoint".to_string()));
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next_endpoint(&self) -> &Endpoint {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
