//! Connection layer for blockchain RPC: endpoint rotation, pooled
//! connections, admission throttling and classified retry.

pub mod client;
pub mod endpoints;
pub mod pool;
pub mod retry;
pub mod throttle;
pub mod transport;

pub use client::{
    AccountFilter, EndpointHealth, LatestBlockhash, ProgramAccount, RpcClient, SignatureInfo,
    SignatureStatus, Submission,
};
pub use endpoints::{Endpoint, EndpointRotator};
pub use pool::{ConnectionPool, RpcConnection, commitment_label};
pub use retry::{RetryConfig, RetryEvent, RetryEventKind, RetryOutcome, RetryPolicy, RetryReport};
pub use throttle::{AdmissionToken, ThrottleConfig, ThrottleGate};
pub use transport::{
    HttpRpcTransport, HttpTransportFactory, RpcTransport, TransportFactory, classify_reqwest_error,
    classify_rpc_error, retryable_status_error,
};
