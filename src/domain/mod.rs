//! Domain layer containing core business types, traits, and error definitions.

pub mod envelope;
pub mod error;
pub mod traits;
pub mod types;

pub use envelope::{EncodingVariant, TransactionEnvelope};
pub use error::{
    AppError, ConfigError, ErrorClass, RpcError, SignerError, TradeFailure, TradeFailureKind,
    ValidationError,
};
pub use traits::{SwapAggregator, TransactionSigner};
pub use types::{
    BuildRequest, ConfirmationOutcome, PriorityFee, Quote, QuoteDetails, QuoteOutcome,
    QuoteRequest, RouteHop, SIMULATED_SIGNATURE_PREFIX, Signature, SignedTransaction,
    SimulatedSignature, TradeConfirmationData, TradeParams, TradePreview, TradeResult, TradeState,
    TxSignature, format_units,
};
