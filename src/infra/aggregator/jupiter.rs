//! Jupiter swap API client (`/quote` and `/swap`).

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, BuildRequest, PriorityFee, QuoteDetails, QuoteOutcome, QuoteRequest, RouteHop, RpcError,
    SwapAggregator, TransactionEnvelope,
};
use crate::infra::rpc::{RetryPolicy, classify_reqwest_error, retryable_status_error};

pub const DEFAULT_JUPITER_URL: &str = "https://lite-api.jup.ag/swap/v1";

/// Error codes Jupiter returns when no route exists
const NO_ROUTE_CODES: [&str; 4] = [
    "COULD_NOT_FIND_ANY_ROUTE",
    "NO_ROUTES_FOUND",
    "ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT",
    "TOKEN_NOT_TRADABLE",
];

#[derive(Debug, Clone)]
pub struct JupiterConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
    /// Client-side quota; `None` relies on retry alone
    pub requests_per_second: Option<NonZeroU32>,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_JUPITER_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            requests_per_second: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: Option<String>,
    other_amount_threshold: Option<String>,
    slippage_bps: Option<u16>,
    #[serde(default)]
    price_impact_pct: Option<String>,
    #[serde(default)]
    route_plan: Vec<RoutePlanStep>,
    context_slot: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePlanStep {
    swap_info: SwapInfo,
    percent: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInfo {
    amm_key: String,
    label: Option<String>,
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    quote_response: &'a Value,
    user_public_key: &'a str,
    wrap_and_unwrap_sol: bool,
    as_legacy_transaction: bool,
    dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prioritization_fee_lamports: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
    last_valid_block_height: u64,
    #[serde(default)]
    prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl ApiError {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn is_no_route(&self) -> bool {
        self.error_code
            .as_deref()
            .is_some_and(|code| NO_ROUTE_CODES.contains(&code))
    }

    fn describe(&self, fallback: &str) -> String {
        match (&self.error_code, &self.error) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => fallback.to_string(),
        }
    }
}

pub struct JupiterClient {
    http_client: Client,
    config: JupiterConfig,
    retry: RetryPolicy,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl JupiterClient {
    pub fn new(config: JupiterConfig, retry: RetryPolicy) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Aggregator(format!("Failed to build HTTP client: {}", e)))?;
        let limiter = config
            .requests_per_second
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        info!(
            base_url = %config.base_url,
            authenticated = config.api_key.is_some(),
            requests_per_second = config.requests_per_second.map(NonZeroU32::get),
            "Created Jupiter client"
        );
        Ok(Self {
            http_client,
            config,
            retry,
            limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("x-api-key", key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, label: &str, request: RequestBuilder) -> Result<(StatusCode, String), RpcError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let response: Response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(label, &e))?;
        let status = response.status();
        if let Some(err) = retryable_status_error(label, status) {
            return Err(err);
        }
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(label, &e))?;
        Ok((status, body))
    }

    fn parse_quote(raw: Value, request: &QuoteRequest) -> Result<QuoteOutcome, RpcError> {
        let parsed: QuoteResponse = serde_json::from_value(raw.clone())
            .map_err(|e| RpcError::fatal(format!("Malformed quote response: {}", e)))?;

        let out_amount = match parsed.out_amount.as_deref().map(parse_amount).transpose()? {
            Some(amount) if amount > 0 => amount,
            _ => {
                return Ok(QuoteOutcome::Unavailable {
                    reason: "aggregator returned no output amount".to_string(),
                });
            }
        };

        let route_plan = parsed
            .route_plan
            .into_iter()
            .map(|step| {
                Ok(RouteHop {
                    amm_key: step.swap_info.amm_key,
                    label: step.swap_info.label,
                    input_mint: step.swap_info.input_mint,
                    output_mint: step.swap_info.output_mint,
                    in_amount: parse_amount(&step.swap_info.in_amount)?,
                    out_amount: parse_amount(&step.swap_info.out_amount)?,
                    percent: step.percent,
                })
            })
            .collect::<Result<Vec<_>, RpcError>>()?;

        Ok(QuoteOutcome::Available(QuoteDetails {
            input_mint: parsed.input_mint,
            output_mint: parsed.output_mint,
            in_amount: parse_amount(&parsed.in_amount)?,
            out_amount,
            other_amount_threshold: parsed
                .other_amount_threshold
                .as_deref()
                .map(parse_amount)
                .transpose()?
                .unwrap_or(out_amount),
            slippage_bps: parsed.slippage_bps.unwrap_or(request.slippage_bps),
            price_impact_pct: parsed.price_impact_pct.unwrap_or_else(|| "0".to_string()),
            route_plan,
            context_slot: parsed.context_slot,
            raw,
        }))
    }
}

fn parse_amount(value: &str) -> Result<u64, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::fatal(format!("Malformed amount '{}' in aggregator response", value)))
}

/// Fatal aggregator answers are business errors; the rest stay transport errors
fn into_app_error(err: RpcError) -> AppError {
    match err {
        RpcError::Fatal { message, .. } => AppError::Aggregator(message),
        other => AppError::Rpc(other),
    }
}

#[async_trait]
impl SwapAggregator for JupiterClient {
    fn name(&self) -> &str {
        "jupiter"
    }

    #[instrument(skip(self, request), fields(input = %request.input_mint, output = %request.output_mint, amount = request.amount))]
    async fn quote(&self, request: &QuoteRequest) -> Result<QuoteOutcome, AppError> {
        let url = self.url("quote");
        let amount = request.amount.to_string();
        let slippage = request.slippage_bps.to_string();
        let mut query = vec![
            ("inputMint", request.input_mint.as_str()),
            ("outputMint", request.output_mint.as_str()),
            ("amount", amount.as_str()),
            ("slippageBps", slippage.as_str()),
        ];
        if request.as_legacy_transaction {
            query.push(("asLegacyTransaction", "true"));
        }

        let outcome = self
            .retry
            .execute("jupiter.quote", |_| {
                let builder = self.http_client.get(&url).query(&query);
                async move {
                    let (status, body) = self.send("jupiter.quote", builder).await?;
                    match status {
                        s if s.is_success() => {
                            let raw: Value = if body.trim().is_empty() {
                                Value::Null
                            } else {
                                serde_json::from_str(&body).map_err(|e| {
                                    RpcError::fatal(format!("Malformed quote response: {}", e))
                                })?
                            };
                            if raw.is_null() {
                                return Ok(QuoteOutcome::Unavailable {
                                    reason: "aggregator returned an empty quote".to_string(),
                                });
                            }
                            Self::parse_quote(raw, request)
                        }
                        StatusCode::NOT_FOUND => Ok(QuoteOutcome::Unavailable {
                            reason: ApiError::parse(&body).describe("no route found"),
                        }),
                        StatusCode::BAD_REQUEST => {
                            let error = ApiError::parse(&body);
                            if error.is_no_route() {
                                Ok(QuoteOutcome::Unavailable {
                                    reason: error.describe("no route found"),
                                })
                            } else {
                                Err(RpcError::Fatal {
                                    code: Some(400),
                                    message: error.describe(&body),
                                })
                            }
                        }
                        s => Err(RpcError::Fatal {
                            code: Some(i64::from(s.as_u16())),
                            message: ApiError::parse(&body).describe(&format!("quote failed with HTTP {}", s)),
                        }),
                    }
                }
            })
            .await;

        if outcome.report.retried() {
            debug!(attempts = outcome.report.attempts, "Quote required retries");
        }
        outcome.into_result().map_err(into_app_error)
    }

    #[instrument(skip(self, request), fields(quote_id = %request.quote.id(), payer = %request.payer))]
    async fn build_swap(&self, request: &BuildRequest<'_>) -> Result<TransactionEnvelope, AppError> {
        let url = self.url("swap");
        let (prioritization_fee_lamports, compute_unit_price_micro_lamports) = match request.priority_fee {
            PriorityFee::Auto => (Some(Value::from("auto")), None),
            PriorityFee::Lamports(lamports) => (Some(Value::from(lamports)), None),
            PriorityFee::ComputeUnitPrice(price) => (None, Some(price)),
        };
        let body = SwapRequest {
            quote_response: &request.quote.details().raw,
            user_public_key: request.payer,
            wrap_and_unwrap_sol: request.wrap_and_unwrap_sol,
            as_legacy_transaction: request.prefer_legacy,
            dynamic_compute_unit_limit: true,
            prioritization_fee_lamports,
            compute_unit_price_micro_lamports,
        };

        let response = self
            .retry
            .execute("jupiter.swap", |_| {
                let builder = self.http_client.post(&url).json(&body);
                async move {
                    let (status, text) = self.send("jupiter.swap", builder).await?;
                    if !status.is_success() {
                        return Err(RpcError::Fatal {
                            code: Some(i64::from(status.as_u16())),
                            message: ApiError::parse(&text).describe(&format!("swap build failed with HTTP {}", status)),
                        });
                    }
                    serde_json::from_str::<SwapResponse>(&text)
                        .map_err(|e| RpcError::fatal(format!("Malformed swap response: {}", e)))
                }
            })
            .await
            .into_result()
            .map_err(into_app_error)?;

        let envelope = TransactionEnvelope::from_base64(&response.swap_transaction, Some(response.last_valid_block_height))?;
        debug!(
            encoding = %envelope.encoding(),
            last_valid_block_height = response.last_valid_block_height,
            prioritization_fee_lamports = response.prioritization_fee_lamports,
            "Swap transaction built"
        );
        Ok(envelope)
    }
}
