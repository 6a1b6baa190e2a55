//! Preflight check: loads configuration, checks every RPC endpoint and
//! optionally previews a quote.

use std::env;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use solana_swap_executor::config::{Config, LogFormat};
use solana_swap_executor::domain::{TradeParams, TransactionSigner};
use solana_swap_executor::infra::KeypairSigner;
use solana_swap_executor::TradeExecutor;

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,solana_swap_executor=debug"));
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Quote parameters from `PREVIEW_INPUT_MINT`, `PREVIEW_OUTPUT_MINT` and
/// `PREVIEW_AMOUNT`, if all three are set
fn preview_params() -> Result<Option<TradeParams>> {
    let (Ok(input), Ok(output), Ok(amount)) = (
        env::var("PREVIEW_INPUT_MINT"),
        env::var("PREVIEW_OUTPUT_MINT"),
        env::var("PREVIEW_AMOUNT"),
    ) else {
        return Ok(None);
    };
    let amount: u64 = amount
        .trim()
        .parse()
        .with_context(|| format!("PREVIEW_AMOUNT '{}' is not an integer", amount))?;
    let mut params = TradeParams::new(input, output, amount);
    if let Ok(slippage) = env::var("PREVIEW_SLIPPAGE_BPS") {
        params = params.with_slippage_bps(slippage.trim().parse().context("PREVIEW_SLIPPAGE_BPS")?);
    }
    Ok(Some(params))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoints = config.rpc_urls.len(),
        commitment = ?config.commitment.commitment,
        "Solana swap executor preflight"
    );

    let executor = TradeExecutor::from_config(&config)?;

    let report = executor.rpc().health_check().await;
    let healthy = report.iter().filter(|h| h.is_healthy()).count();
    for health in &report {
        match &health.slot {
            Ok(slot) => info!(endpoint = %health.endpoint, slot, latency_ms = health.latency.as_millis() as u64, "Endpoint ok"),
            Err(e) => warn!(endpoint = %health.endpoint, error = %e, "Endpoint failed"),
        }
    }
    if healthy == 0 {
        bail!("No healthy RPC endpoint out of {}", report.len());
    }

    let signer = config
        .payer_keypair
        .as_ref()
        .map(KeypairSigner::from_base58)
        .transpose()
        .context("Invalid SOLANA_PAYER_KEYPAIR")?;

    if let Some(signer) = &signer {
        let payer = signer.payer();
        let lamports = executor.rpc().get_balance(&payer).await?;
        info!(payer = %payer, lamports, "Payer balance");
    }

    match (preview_params()?, &signer) {
        (Some(params), Some(signer)) => {
            let prepared = executor.prepare(&params, &signer.payer()).await?;
            let preview = &prepared.preview;
            info!(
                quote_id = %preview.quote_id,
                input = %preview.input_amount,
                output = %preview.output_amount,
                minimum_received = %preview.minimum_received,
                price_impact_pct = %preview.price_impact_pct,
                route = ?preview.route,
                expires_at = %preview.expires_at,
                "Quote preview"
            );
        }
        (Some(_), None) => warn!("Preview requested but SOLANA_PAYER_KEYPAIR is not set"),
        (None, _) => {}
    }

    info!(healthy, total = report.len(), "Preflight complete");
    Ok(())
}
