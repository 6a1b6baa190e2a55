//! Caller-facing trade pipeline: quote, build, dispatch, confirm.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{Instrument, error, info, info_span, warn};

use super::builder::TransactionBuilder;
use super::confirmation::{ConfirmationWatcher, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use super::dispatcher::{DEFAULT_SIMULATED_LATENCY, Dispatch, DispatchError, TransactionDispatcher};
use super::lifecycle::TradeLifecycle;
use super::quote::{DEFAULT_QUOTE_VALIDITY, QuoteResolver};
use crate::config::Config;
use crate::domain::types::parse_pubkey;
use crate::domain::{
    AppError, ConfirmationOutcome, PriorityFee, Quote, QuoteOutcome, SwapAggregator, TradeConfirmationData,
    TradeFailure, TradeParams, TradePreview, TradeResult, TradeState, TransactionSigner, TxSignature, ValidationError,
    format_units,
};
use crate::infra::aggregator::JupiterClient;
use crate::infra::rpc::{ConnectionPool, RetryPolicy, RpcClient, ThrottleGate};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub quote_validity: Duration,
    pub confirmation_timeout: Duration,
    pub confirmation_poll: Duration,
    pub simulated_latency: Duration,
    /// Ask the aggregator for legacy transactions
    pub prefer_legacy: bool,
    /// Used when the trade does not name one
    pub priority_fee: PriorityFee,
    pub skip_preflight: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            quote_validity: DEFAULT_QUOTE_VALIDITY,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            confirmation_poll: DEFAULT_POLL_INTERVAL,
            simulated_latency: DEFAULT_SIMULATED_LATENCY,
            prefer_legacy: false,
            priority_fee: PriorityFee::Auto,
            skip_preflight: false,
        }
    }
}

/// A failure during settlement, with the signature if one was obtained
struct SettlementError {
    error: AppError,
    signature: Option<TxSignature>,
}

impl From<AppError> for SettlementError {
    fn from(error: AppError) -> Self {
        Self { error, signature: None }
    }
}

impl From<DispatchError> for SettlementError {
    fn from(failure: DispatchError) -> Self {
        Self {
            error: failure.error,
            signature: failure.signature.map(TxSignature::Real),
        }
    }
}

pub struct TradeExecutor {
    rpc: Arc<RpcClient>,
    resolver: QuoteResolver,
    builder: TransactionBuilder,
    dispatcher: TransactionDispatcher,
    watcher: ConfirmationWatcher,
    config: ExecutorConfig,
}

impl TradeExecutor {
    #[must_use]
    pub fn new(rpc: Arc<RpcClient>, aggregator: Arc<dyn SwapAggregator>, config: ExecutorConfig) -> Self {
        Self {
            resolver: QuoteResolver::new(Arc::clone(&aggregator), config.quote_validity, config.prefer_legacy),
            builder: TransactionBuilder::new(aggregator, config.priority_fee, config.prefer_legacy),
            dispatcher: TransactionDispatcher::new(Arc::clone(&rpc), config.simulated_latency, config.skip_preflight),
            watcher: ConfirmationWatcher::new(Arc::clone(&rpc), config.confirmation_poll),
            rpc,
            config,
        }
    }

    /// Wire the HTTP RPC stack and the Jupiter client from configuration
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let pool = ConnectionPool::http(config.rpc_urls.clone(), config.commitment, config.rpc_timeout)?;
        let gate = ThrottleGate::new(config.throttle);
        let retry = RetryPolicy::new(config.retry);
        let rpc = RpcClient::new(Arc::new(pool), Arc::new(gate), retry.clone());
        let aggregator = JupiterClient::new(config.aggregator.clone(), retry)?;
        Ok(Self::new(Arc::new(rpc), Arc::new(aggregator), config.executor.clone()))
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Quote and preview a trade for `payer` without building anything.
    /// The returned data carries the quote's expiry.
    pub async fn prepare(&self, params: &TradeParams, payer: &str) -> Result<TradeConfirmationData, AppError> {
        parse_pubkey("payer", payer)?;
        let quote = match self.resolver.resolve(params).await? {
            QuoteOutcome::Available(quote) => quote,
            QuoteOutcome::Unavailable { reason } => return Err(AppError::QuoteUnavailable(reason)),
        };
        let preview = preview(params, &quote, payer);
        info!(
            quote_id = %preview.quote_id,
            input = %preview.input_amount,
            output = %preview.output_amount,
            minimum_received = %preview.minimum_received,
            expires_at = %preview.expires_at,
            "Trade prepared"
        );
        Ok(TradeConfirmationData {
            params: params.clone(),
            quote,
            preview,
        })
    }

    /// Run a trade end to end from a fresh quote
    pub async fn execute(&self, params: &TradeParams, signer: &dyn TransactionSigner) -> TradeResult {
        let mut lifecycle = TradeLifecycle::new();
        let span = info_span!("execute", attempt_id = %lifecycle.attempt_id(), amount = params.amount);
        async {
            let quote = match self.resolver.resolve(params).await {
                Ok(QuoteOutcome::Available(quote)) => quote,
                Ok(QuoteOutcome::Unavailable { reason }) => {
                    return failed(&mut lifecycle, params, None, None, AppError::QuoteUnavailable(reason));
                }
                Err(e) => return failed(&mut lifecycle, params, None, None, e),
            };
            self.run(&mut lifecycle, params, &quote, signer).await
        }
        .instrument(span)
        .await
    }

    /// Run a previously prepared trade. The quote is consumed; a stale one
    /// fails with `QuoteExpired` before the aggregator is contacted. The
    /// signer must be the payer the trade was previewed for.
    pub async fn execute_prepared(&self, prepared: TradeConfirmationData, signer: &dyn TransactionSigner) -> TradeResult {
        let mut lifecycle = TradeLifecycle::new();
        let span = info_span!(
            "execute_prepared",
            attempt_id = %lifecycle.attempt_id(),
            quote_id = %prepared.quote.id()
        );
        async {
            let payer = signer.payer();
            if prepared.preview.payer != payer {
                warn!(prepared_for = %prepared.preview.payer, signer = %payer, "Signer does not match prepared payer");
                let error = ValidationError::field(
                    "payer",
                    format!("prepared for {} but signer is {payer}", prepared.preview.payer),
                );
                return failed(&mut lifecycle, &prepared.params, Some(&prepared.quote), None, error.into());
            }
            self.run(&mut lifecycle, &prepared.params, &prepared.quote, signer).await
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        lifecycle: &mut TradeLifecycle,
        params: &TradeParams,
        quote: &Quote,
        signer: &dyn TransactionSigner,
    ) -> TradeResult {
        match self.settle(lifecycle, params, quote, signer).await {
            Ok(signature) => {
                let simulated = signature.is_simulated();
                info!(signature = %signature, simulated, state = %lifecycle.state(), "Trade completed");
                let details = quote.details();
                TradeResult {
                    attempt_id: lifecycle.attempt_id(),
                    success: true,
                    signature: Some(signature),
                    simulated,
                    input_amount: format_units(details.in_amount, params.input_decimals),
                    output_amount: format_units(details.out_amount, params.output_decimals),
                    price_impact_pct: details.price_impact_pct.clone(),
                    state: lifecycle.state(),
                    history: lifecycle.history().to_vec(),
                    error: None,
                    completed_at: Utc::now(),
                }
            }
            Err(SettlementError { error, signature }) => failed(lifecycle, params, Some(quote), signature, error),
        }
    }

    async fn settle(
        &self,
        lifecycle: &mut TradeLifecycle,
        params: &TradeParams,
        quote: &Quote,
        signer: &dyn TransactionSigner,
    ) -> Result<TxSignature, SettlementError> {
        let envelope = self.builder.build(quote, &signer.payer(), params).await?;

        let (signature, send_error) = match self.dispatcher.dispatch(&envelope, signer, lifecycle).await? {
            Dispatch::Simulated { signature, .. } => {
                // nothing was submitted, so there is nothing to watch
                lifecycle.advance(TradeState::Succeeded);
                return Ok(TxSignature::Simulated(signature));
            }
            Dispatch::Submitted(signature) => (signature, None),
            Dispatch::InDoubt { signature, error } => (signature, Some(error)),
        };

        let outcome = self
            .watcher
            .confirm(
                &TxSignature::Real(signature.clone()),
                self.config.confirmation_timeout,
                envelope.last_valid_block_height(),
            )
            .await;
        let error = match (outcome, send_error) {
            (ConfirmationOutcome::Finalized { .. } | ConfirmationOutcome::Simulated, _) => {
                lifecycle.advance(TradeState::Confirmed);
                return Ok(TxSignature::Real(signature));
            }
            (ConfirmationOutcome::OnChainError(message), _) => AppError::TransactionFailed(message),
            (ConfirmationOutcome::TimedOut, _) => AppError::ConfirmationTimeout {
                signature: signature.to_string(),
                timeout: self.config.confirmation_timeout,
            },
            // never landed, so the failed send is what went wrong
            (ConfirmationOutcome::BlockhashExpired, Some(send_error)) => AppError::Rpc(send_error),
            (ConfirmationOutcome::BlockhashExpired, None) => AppError::BlockhashExpired {
                signature: signature.to_string(),
            },
        };
        Err(SettlementError {
            error,
            signature: Some(TxSignature::Real(signature)),
        })
    }
}

fn preview(params: &TradeParams, quote: &Quote, payer: &str) -> TradePreview {
    let details = quote.details();
    TradePreview {
        quote_id: quote.id(),
        payer: payer.to_string(),
        input_amount: format_units(details.in_amount, params.input_decimals),
        output_amount: format_units(details.out_amount, params.output_decimals),
        minimum_received: format_units(details.other_amount_threshold, params.output_decimals),
        price_impact_pct: details.price_impact_pct.clone(),
        slippage_bps: details.slippage_bps,
        route: details
            .route_plan
            .iter()
            .map(|hop| hop.label.clone().unwrap_or_else(|| hop.amm_key.clone()))
            .collect(),
        expires_at: quote.expires_at(),
    }
}

fn failed(
    lifecycle: &mut TradeLifecycle,
    params: &TradeParams,
    quote: Option<&Quote>,
    signature: Option<TxSignature>,
    error: AppError,
) -> TradeResult {
    lifecycle.fail();
    let failure = TradeFailure::from(&error);
    match &error {
        AppError::QuoteUnavailable(_) | AppError::QuoteExpired { .. } | AppError::SigningRejected(_) => {
            warn!(kind = ?failure.kind, error = %error, "Trade not executed")
        }
        _ => error!(kind = ?failure.kind, error = %error, "Trade failed"),
    }

    let (input_amount, output_amount, price_impact_pct) = match quote {
        Some(quote) => {
            let details = quote.details();
            (
                format_units(details.in_amount, params.input_decimals),
                format_units(details.out_amount, params.output_decimals),
                details.price_impact_pct.clone(),
            )
        }
        None => (format_units(params.amount, params.input_decimals), "0".to_string(), "0".to_string()),
    };

    TradeResult {
        attempt_id: lifecycle.attempt_id(),
        success: false,
        signature,
        simulated: false,
        input_amount,
        output_amount,
        price_impact_pct,
        state: lifecycle.state(),
        history: lifecycle.history().to_vec(),
        error: Some(failure),
        completed_at: Utc::now(),
    }
}
