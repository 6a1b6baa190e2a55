//! Connection cache: one reusable connection per endpoint.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use solana_commitment_config::CommitmentConfig;
use tracing::debug;

use super::endpoints::{Endpoint, EndpointRotator};
use super::transport::{HttpTransportFactory, RpcTransport, TransportFactory};
use crate::domain::RpcError;

/// Wire name of a commitment level
pub fn commitment_label(commitment: CommitmentConfig) -> &'static str {
    if commitment.is_finalized() {
        "finalized"
    } else if commitment.is_confirmed() {
        "confirmed"
    } else {
        "processed"
    }
}

/// A connection bound to one endpoint, with a fixed commitment level
pub struct RpcConnection {
    endpoint: Endpoint,
    commitment: CommitmentConfig,
    transport: Arc<dyn RpcTransport>,
}

impl RpcConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }

    pub fn commitment_label(&self) -> &'static str {
        commitment_label(self.commitment)
    }

    /// One raw call, no throttling or retry
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.transport.send_request(method, params).await
    }
}

/// Owns the rotation order and the connection cache.
///
/// Connections are created on first use and never evicted. The cache entry is
/// locked while a connection is being created, so concurrent first use of the
/// same endpoint still yields a single connection.
pub struct ConnectionPool {
    rotator: EndpointRotator,
    connections: DashMap<Endpoint, Arc<RpcConnection>>,
    factory: Arc<dyn TransportFactory>,
    commitment: CommitmentConfig,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        rotator: EndpointRotator,
        commitment: CommitmentConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            rotator,
            connections: DashMap::new(),
            factory,
            commitment,
        }
    }

    /// Pool backed by HTTP JSON-RPC
    pub fn http(
        endpoints: Vec<Endpoint>,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Result<Self, crate::domain::AppError> {
        let rotator = EndpointRotator::new(endpoints)?;
        let factory = HttpTransportFactory::new(timeout)?;
        Ok(Self::new(rotator, commitment, Arc::new(factory)))
    }

    /// Cached connection for `endpoint`, or for the next rotated endpoint
    pub fn connection(&self, endpoint: Option<&Endpoint>) -> Arc<RpcConnection> {
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.clone(),
            None => self.rotator.next_endpoint().clone(),
        };
        let entry = self.connections.entry(endpoint.clone()).or_insert_with(|| {
            debug!(endpoint = %endpoint, commitment = commitment_label(self.commitment), "Creating RPC connection");
            Arc::new(RpcConnection {
                transport: self.factory.create(&endpoint),
                endpoint,
                commitment: self.commitment,
            })
        });
        Arc::clone(entry.value())
    }

    pub fn next_endpoint(&self) -> &Endpoint {
        self.rotator.next_endpoint()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        self.rotator.endpoints()
    }

    pub fn len(&self) -> usize {
        self.rotator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotator.is_empty()
    }

    /// Number of connections created so far
    pub fn cached_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }
}
