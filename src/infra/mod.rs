//! Infrastructure layer implementations.

pub mod aggregator;
pub mod rpc;
pub mod signer;

pub use aggregator::{JupiterClient, JupiterConfig};
pub use rpc::{ConnectionPool, Endpoint, RetryPolicy, RpcClient, ThrottleGate};
pub use signer::{KeypairSigner, signing_key_from_base58};
