//! Quote resolution against the aggregator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::domain::{AppError, Quote, QuoteOutcome, QuoteRequest, SwapAggregator, TradeParams};

pub const DEFAULT_QUOTE_VALIDITY: Duration = Duration::from_secs(30);

pub struct QuoteResolver {
    aggregator: Arc<dyn SwapAggregator>,
    validity: Duration,
    prefer_legacy: bool,
}

impl QuoteResolver {
    #[must_use]
    pub fn new(aggregator: Arc<dyn SwapAggregator>, validity: Duration, prefer_legacy: bool) -> Self {
        Self {
            aggregator,
            validity,
            prefer_legacy,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Validate the parameters and ask for a route.
    /// "No route" comes back as `QuoteOutcome::Unavailable`.
    #[instrument(skip(self, params), fields(aggregator = self.aggregator.name(), amount = params.amount))]
    pub async fn resolve(&self, params: &TradeParams) -> Result<QuoteOutcome<Quote>, AppError> {
        params.check()?;
        let request = QuoteRequest {
            as_legacy_transaction: self.prefer_legacy,
            ..QuoteRequest::from(params)
        };

        let outcome = self.aggregator.quote(&request).await?;
        let outcome = outcome.map(|details| Quote::issue(details, self.validity));
        match &outcome {
            QuoteOutcome::Available(quote) => info!(
                quote_id = %quote.id(),
                out_amount = quote.details().out_amount,
                price_impact_pct = %quote.details().price_impact_pct,
                hops = quote.details().route_plan.len(),
                expires_at = %quote.expires_at(),
                "Quote issued"
            ),
            QuoteOutcome::Unavailable { reason } => info!(reason = %reason, "No route available"),
        }
        Ok(outcome)
    }

    /// Quote an (input, output, amount) triple with default decimals
    pub async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<QuoteOutcome<Quote>, AppError> {
        let params = TradeParams::new(input_mint, output_mint, amount).with_slippage_bps(max_slippage_bps);
        self.resolve(&params).await
    }
}
