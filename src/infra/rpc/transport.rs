//! JSON-RPC 2.0 transport and boundary error classification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::endpoints::Endpoint;
use crate::domain::RpcError;

/// JSON-RPC codes providers use for throttling
const RATE_LIMIT_CODES: [i64; 2] = [429, -32429];

/// Node-internal codes that clear up on their own:
/// internal error, node unhealthy, slot skipped, block status not yet
/// available, block not yet available.
const RETRYABLE_NODE_CODES: [i64; 5] = [-32603, -32005, -32004, -32014, -32016];

/// A single JSON-RPC round trip to one endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Builds the transport behind each pooled connection
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &Endpoint) -> Arc<dyn RpcTransport>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC transport bound to one endpoint
pub struct HttpRpcTransport {
    http_client: Client,
    endpoint: Endpoint,
    label: String,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    pub fn new(http_client: Client, endpoint: Endpoint) -> Self {
        let label = endpoint.to_string();
        Self {
            http_client,
            endpoint,
            label,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http_client
            .post(self.endpoint.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&self.label, &e))?;

        let status = response.status();
        if let Some(err) = retryable_status_error(&self.label, status) {
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&self.label, &e))?;
        trace!(endpoint = %self.label, method, status = %status, bytes = body.len(), "RPC response");

        let rpc_response: JsonRpcResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(RpcError::fatal(format!("Malformed JSON-RPC response: {}", e)));
            }
            Err(_) => {
                return Err(RpcError::Fatal {
                    code: Some(i64::from(status.as_u16())),
                    message: format!("HTTP {} from {}", status, self.label),
                });
            }
        };

        if let Some(error) = rpc_response.error {
            return Err(classify_rpc_error(&self.label, error.code, error.message));
        }
        if !status.is_success() {
            return Err(RpcError::Fatal {
                code: Some(i64::from(status.as_u16())),
                message: format!("HTTP {} from {}", status, self.label),
            });
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }
}

/// One shared `reqwest::Client` behind every HTTP connection
#[derive(Clone)]
pub struct HttpTransportFactory {
    http_client: Client,
}

impl HttpTransportFactory {
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(&self, endpoint: &Endpoint) -> Arc<dyn RpcTransport> {
        Arc::new(HttpRpcTransport::new(self.http_client.clone(), endpoint.clone()))
    }
}

/// Classify a JSON-RPC error object
pub fn classify_rpc_error(endpoint: &str, code: i64, message: String) -> RpcError {
    if RATE_LIMIT_CODES.contains(&code) {
        RpcError::RateLimited {
            endpoint: endpoint.to_string(),
            message,
        }
    } else if RETRYABLE_NODE_CODES.contains(&code) {
        RpcError::NodeUnavailable {
            endpoint: endpoint.to_string(),
            code,
            message,
        }
    } else {
        RpcError::Fatal {
            code: Some(code),
            message,
        }
    }
}

/// Classify a transport-level failure from reqwest
pub fn classify_reqwest_error(endpoint: &str, err: &reqwest::Error) -> RpcError {
    if let Some(status) = err.status()
        && let Some(classified) = retryable_status_error(endpoint, status)
    {
        return classified;
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RpcError::TransientNetwork {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    } else {
        RpcError::fatal(err.to_string())
    }
}

/// HTTP statuses worth retrying: 429 and gateway errors
pub fn retryable_status_error(endpoint: &str, status: StatusCode) -> Option<RpcError> {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(RpcError::RateLimited {
            endpoint: endpoint.to_string(),
            message: status.to_string(),
        }),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Some(RpcError::TransientNetwork {
                endpoint: endpoint.to_string(),
                message: status.to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorClass;

    #[test]
    fn test_classify_rpc_error_codes() {
        assert_eq!(
            classify_rpc_error("e", 429, "slow down".into()).class(),
            ErrorClass::RateLimit
        );
        assert_eq!(
            classify_rpc_error("e", -32429, "slow down".into()).class(),
            ErrorClass::RateLimit
        );
        for code in RETRYABLE_NODE_CODES {
            assert_eq!(
                classify_rpc_error("e", code, "node".into()).class(),
                ErrorClass::Transient
            );
        }
        assert_eq!(
            classify_rpc_error("e", -32602, "Invalid params".into()),
            RpcError::Fatal {
                code: Some(-32602),
                message: "Invalid params".to_string()
            }
        );
    }

    #[test]
    fn test_retryable_status_error() {
        assert!(matches!(
            retryable_status_error("e", StatusCode::TOO_MANY_REQUESTS),
            Some(RpcError::RateLimited { .. })
        ));
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(matches!(
                retryable_status_error("e", status),
                Some(RpcError::TransientNetwork { .. })
            ));
        }
        assert!(retryable_status_error("e", StatusCode::BAD_REQUEST).is_none());
        assert!(retryable_status_error("e", StatusCode::INTERNAL_SERVER_ERROR).is_none());
    }

    #[test]
    fn test_json_rpc_response_with_result() {
        let json = r#"{"jsonrpc":"2.0","result":12345,"id":1}"#;
        let response: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.result, Some(serde_json::json!(12345)));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_json_rpc_response_with_error() {
        let json = r#"{"jsonrpc":"2.0","error":{"code":-32005,"message":"Node is behind"},"id":1}"#;
        let response: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32005);
        assert_eq!(error.message, "Node is behind");
    }

    #[test]
    fn test_factory_creation() {
        let factory = HttpTransportFactory::new(Duration::from_secs(5));
        assert!(factory.is_ok());
    }
}
