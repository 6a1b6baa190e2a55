//! Domain traits defining contracts for external collaborators.

use async_trait::async_trait;

use super::envelope::{EncodingVariant, TransactionEnvelope};
use super::error::{AppError, SignerError};
use super::types::{BuildRequest, QuoteDetails, QuoteOutcome, QuoteRequest, SignedTransaction};

/// Liquidity aggregator: prices routes and materializes swap transactions
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Price a route. "No route" is `QuoteOutcome::Unavailable`, not an error.
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteOutcome<QuoteDetails>, AppError>;

    /// Turn a live quote into a signable transaction for `request.payer`
    async fn build_swap(&self, request: &BuildRequest<'_>) -> Result<TransactionEnvelope, AppError>;
}

/// Signing capability supplied by the caller (wallet integration)
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Fee payer address, base58
    fn payer(&self) -> String;

    /// Whether this integration can fully handle the encoding.
    /// Checked before `sign` is ever called.
    fn supports(&self, encoding: EncodingVariant) -> bool {
        let _ = encoding;
        true
    }

    /// Sign the envelope. `SignerError::Rejected` is a user decision.
    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTransaction, SignerError>;
}
