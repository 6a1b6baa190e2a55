//! Application layer: the trade settlement pipeline.

pub mod builder;
pub mod confirmation;
pub mod dispatcher;
pub mod executor;
pub mod lifecycle;
pub mod quote;

pub use builder::TransactionBuilder;
pub use confirmation::ConfirmationWatcher;
pub use dispatcher::{Dispatch, TransactionDispatcher};
pub use executor::{ExecutorConfig, TradeExecutor};
pub use lifecycle::TradeLifecycle;
pub use quote::QuoteResolver;
