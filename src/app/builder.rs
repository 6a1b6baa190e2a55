//! Materializes a signable transaction from a live quote.

use std::sync::Arc;

use tokio::time::timeout_at;
use tracing::{instrument, warn};

use crate::domain::types::parse_pubkey;
use crate::domain::{AppError, BuildRequest, PriorityFee, Quote, SwapAggregator, TradeParams, TransactionEnvelope};

pub struct TransactionBuilder {
    aggregator: Arc<dyn SwapAggregator>,
    default_priority_fee: PriorityFee,
    prefer_legacy: bool,
}

impl TransactionBuilder {
    #[must_use]
    pub fn new(aggregator: Arc<dyn SwapAggregator>, default_priority_fee: PriorityFee, prefer_legacy: bool) -> Self {
        Self {
            aggregator,
            default_priority_fee,
            prefer_legacy,
        }
    }

    /// Fails with `QuoteExpired` before any network call once the quote is
    /// stale. The aggregator call, retries included, is cut off at the
    /// quote's deadline.
    #[instrument(skip(self, quote, params), fields(quote_id = %quote.id()))]
    pub async fn build(&self, quote: &Quote, payer: &str, params: &TradeParams) -> Result<TransactionEnvelope, AppError> {
        if quote.is_expired() {
            warn!(expired_at = %quote.expires_at(), "Refusing to build from a stale quote");
            return Err(expired(quote));
        }
        parse_pubkey("payer", payer)?;

        let request = BuildRequest {
            quote,
            payer,
            wrap_and_unwrap_sol: params.wrap_and_unwrap_sol,
            priority_fee: params.priority_fee.unwrap_or(self.default_priority_fee),
            prefer_legacy: self.prefer_legacy,
        };
        let envelope = match timeout_at(quote.deadline(), self.aggregator.build_swap(&request)).await {
            Ok(built) => built?,
            Err(_) => {
                warn!(expired_at = %quote.expires_at(), "Quote went stale while building");
                return Err(expired(quote));
            }
        };

        match envelope.fee_payer() {
            Some(fee_payer) if fee_payer == payer => Ok(envelope),
            other => Err(AppError::InvalidEnvelope(format!(
                "built transaction pays fees from {} instead of {}",
                other.as_deref().unwrap_or("nobody"),
                payer
            ))),
        }
    }
}

fn expired(quote: &Quote) -> AppError {
    AppError::QuoteExpired {
        quote_id: quote.id().to_string(),
        expired_at: quote.expires_at(),
    }
}
