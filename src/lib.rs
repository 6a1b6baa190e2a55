//! Resilient Solana swap execution core.
//!
//! Pooled, throttled and retried RPC access ([`infra::rpc`]), an aggregator
//! client ([`infra::aggregator`]) and the quote-to-confirmation trade
//! pipeline ([`app::TradeExecutor`]).

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use app::{ExecutorConfig, TradeExecutor};
pub use config::Config;
pub use domain::{AppError, TradeParams, TradeResult};
