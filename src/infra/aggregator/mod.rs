//! Liquidity aggregator clients.

pub mod jupiter;

pub use jupiter::{DEFAULT_JUPITER_URL, JupiterClient, JupiterConfig};
