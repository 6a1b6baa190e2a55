//! End-to-end trade pipeline tests: quote, build, dispatch and confirm
//! against mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::json;

use solana_swap_executor::app::{ExecutorConfig, TradeExecutor};
use solana_swap_executor::domain::types::{SOL_MINT, USDC_MINT};
use solana_swap_executor::domain::{
    AppError, EncodingVariant, RpcError, SIMULATED_SIGNATURE_PREFIX, TradeFailureKind, TradeParams, TradeState,
    TransactionSigner, TxSignature,
};
use solana_swap_executor::infra::KeypairSigner;
use solana_swap_executor::infra::rpc::{RetryConfig, ThrottleConfig};
use solana_swap_executor::test_utils::{
    MockAggregator, MockRpcTransport, MockSigner, TEST_PAYER, mock_rpc_client, mock_rpc_client_with,
};

fn sol_to_usdc() -> TradeParams {
    TradeParams::new(SOL_MINT, USDC_MINT, 1_000_000_000).with_decimals(9, 6)
}

fn executor(transport: &Arc<MockRpcTransport>, aggregator: &Arc<MockAggregator>) -> TradeExecutor {
    TradeExecutor::new(mock_rpc_client(transport.clone()), aggregator.clone(), ExecutorConfig::default())
}

#[tokio::test]
async fn test_supported_encoding_settles_with_real_signature() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let executor = executor(&transport, &aggregator);

    let prepared = executor.prepare(&sol_to_usdc(), TEST_PAYER).await.unwrap();
    assert!(prepared.quote.details().out_amount > 0);
    assert!(prepared.quote.details().price_impact_pct.parse::<f64>().is_ok());

    let signer = MockSigner::new();
    let result = executor.execute_prepared(prepared, &signer).await;

    assert!(result.success, "{:?}", result.error);
    assert!(!result.simulated);
    let signature = result.signature.expect("signature");
    assert!(!signature.is_simulated());
    assert!(!signature.as_str().starts_with(SIMULATED_SIGNATURE_PREFIX));
    assert_eq!(result.output_amount, "150.25");
    assert_eq!(transport.calls_for("sendTransaction"), 1);
    assert!(transport.calls_for("getSignatureStatuses") >= 1);
}

#[tokio::test]
async fn test_keypair_signer_end_to_end() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new().with_encoding(EncodingVariant::Legacy));
    let signer = KeypairSigner::new(SigningKey::generate(&mut OsRng));

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.state, TradeState::Confirmed);
    assert_eq!(aggregator.last_build().unwrap().payer, signer.payer());
    // the mock node echoes the fee payer signature, which must be a valid one
    match result.signature {
        Some(TxSignature::Real(signature)) => assert_eq!(bs58::decode(signature.as_str()).into_vec().unwrap().len(), 64),
        other => panic!("expected a real signature, got {:?}", other),
    }
}

#[tokio::test]
async fn test_user_rejection_is_terminal_and_not_retried() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let signer = MockSigner::rejecting();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(!result.success);
    assert!(result.signature.is_none());
    assert_eq!(result.error.as_ref().unwrap().kind, TradeFailureKind::SigningRejected);
    assert_eq!(signer.sign_calls(), 1);
    assert_eq!(aggregator.build_calls(), 1);
    assert_eq!(transport.total_calls(), 0);
    assert_eq!(
        result.history,
        vec![TradeState::Unsigned, TradeState::Signing, TradeState::Failed]
    );
}

#[tokio::test]
async fn test_signing_failure_is_reported() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let signer = MockSigner::failing();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;
    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, TradeFailureKind::SigningFailed);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ten_concurrent_executions_respect_the_gate() {
    let transport = Arc::new(MockRpcTransport::with_latency(Duration::from_millis(50)));
    let client = mock_rpc_client_with(
        transport.clone(),
        ThrottleConfig {
            max_concurrent: 5,
            min_interval: Duration::ZERO,
        },
        RetryConfig::default(),
    );
    let aggregator = Arc::new(MockAggregator::new());
    let executor = Arc::new(TradeExecutor::new(client, aggregator, ExecutorConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            let signer = MockSigner::new();
            executor.execute(&sol_to_usdc(), &signer).await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{:?}", result.error);
    }

    assert_eq!(transport.calls_for("sendTransaction"), 10);
    assert!(transport.max_in_flight() <= 5);
    assert_eq!(executor.rpc().gate().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_prepared_quote_never_reaches_build() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let executor = executor(&transport, &aggregator);

    let prepared = executor.prepare(&sol_to_usdc(), TEST_PAYER).await.unwrap();
    let validity = prepared.quote.validity();
    tokio::time::advance(validity + Duration::from_secs(1)).await;

    let result = executor.execute_prepared(prepared, &MockSigner::new()).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, TradeFailureKind::QuoteExpired);
    assert_eq!(aggregator.quote_calls(), 1);
    assert_eq!(aggregator.build_calls(), 0);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_encoding_degrades_to_simulation() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new().with_encoding(EncodingVariant::V0));
    let signer = MockSigner::new().legacy_only();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(result.success);
    assert!(result.simulated);
    assert_eq!(
        result.history,
        vec![TradeState::Unsigned, TradeState::DegradedSimulated, TradeState::Succeeded]
    );
    let signature = result.signature.unwrap();
    assert!(signature.as_str().starts_with(SIMULATED_SIGNATURE_PREFIX));
    assert_eq!(signer.sign_calls(), 0);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_no_route_is_reported_without_building() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new().without_route("NO_ROUTES_FOUND"));

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &MockSigner::new()).await;

    assert!(!result.success);
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, TradeFailureKind::QuoteUnavailable);
    assert!(failure.message.contains("NO_ROUTES_FOUND"));
    assert_eq!(aggregator.build_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_on_chain_failure_keeps_signature() {
    let transport = Arc::new(MockRpcTransport::new());
    transport.set_ok(
        "getSignatureStatuses",
        json!({
            "context": { "slot": 1 },
            "value": [{
                "slot": 900, "confirmations": null,
                "err": { "InstructionError": [3, { "Custom": 6001 }] },
                "confirmationStatus": "confirmed"
            }]
        }),
    );
    let aggregator = Arc::new(MockAggregator::new());
    let signer = MockSigner::new();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(!result.success);
    assert_eq!(result.state, TradeState::Failed);
    assert_eq!(result.error.unwrap().kind, TradeFailureKind::OnChain);
    assert_eq!(result.signature, Some(TxSignature::Real(signer.signature())));
    assert_eq!(
        result.history,
        vec![
            TradeState::Unsigned,
            TradeState::Signing,
            TradeState::Submitted,
            TradeState::Failed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_blockhash_expiry_fails_the_trade() {
    let transport = Arc::new(MockRpcTransport::new());
    transport.set_ok("getSignatureStatuses", json!({ "context": { "slot": 1 }, "value": [null] }));
    transport.set_ok("getBlockHeight", json!(2_000));
    let aggregator = Arc::new(MockAggregator::new().with_last_valid_block_height(1_500));

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &MockSigner::new()).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, TradeFailureKind::BlockhashExpired);
    assert_eq!(transport.calls_for("getSignatureStatuses"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_submission_is_retried() {
    let transport = Arc::new(MockRpcTransport::new());
    transport.push_err(
        "sendTransaction",
        RpcError::RateLimited {
            endpoint: "http://mock-rpc.local".to_string(),
            message: "429 Too Many Requests".to_string(),
        },
    );
    let aggregator = Arc::new(MockAggregator::new());

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &MockSigner::new()).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(transport.calls_for("sendTransaction"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_submission_outage_fails_with_network_kind() {
    let transport = Arc::new(MockRpcTransport::new());
    transport.set_err(
        "sendTransaction",
        RpcError::TransientNetwork {
            endpoint: "http://mock-rpc.local".to_string(),
            message: "connection reset".to_string(),
        },
    );
    // the transaction may have gone out, so it is watched until its blockhash lapses
    transport.set_ok("getSignatureStatuses", json!({ "context": { "slot": 1 }, "value": [null] }));
    transport.set_ok("getBlockHeight", json!(2_000));
    let aggregator = Arc::new(MockAggregator::new());
    let signer = MockSigner::new();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(!result.success);
    assert_eq!(result.signature, Some(TxSignature::Real(signer.signature())));
    assert_eq!(result.error.unwrap().kind, TradeFailureKind::Network);
    assert_eq!(transport.calls_for("sendTransaction"), 6);
    assert!(transport.calls_for("getSignatureStatuses") >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_processed_after_timeout_settles_through_confirmation() {
    let transport = Arc::new(MockRpcTransport::new());
    transport.push_err(
        "sendTransaction",
        RpcError::TransientNetwork {
            endpoint: "http://mock-rpc.local".to_string(),
            message: "request timed out".to_string(),
        },
    );
    transport.push_err(
        "sendTransaction",
        RpcError::fatal("Transaction simulation failed: This transaction has already been processed"),
    );
    let aggregator = Arc::new(MockAggregator::new());
    let signer = MockSigner::new();

    let result = executor(&transport, &aggregator).execute(&sol_to_usdc(), &signer).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.state, TradeState::Confirmed);
    assert_eq!(result.signature, Some(TxSignature::Real(signer.signature())));
    assert_eq!(transport.calls_for("sendTransaction"), 2);
    assert!(transport.calls_for("getSignatureStatuses") >= 1);
}

#[tokio::test]
async fn test_prepared_trade_rejects_a_different_signer() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let executor = executor(&transport, &aggregator);

    let prepared = executor.prepare(&sol_to_usdc(), TEST_PAYER).await.unwrap();
    let signer = KeypairSigner::new(SigningKey::generate(&mut OsRng));
    assert_ne!(signer.payer(), TEST_PAYER);

    let result = executor.execute_prepared(prepared, &signer).await;

    assert!(!result.success);
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, TradeFailureKind::InvalidRequest);
    assert!(failure.message.contains("payer"));
    assert!(result.signature.is_none());
    assert_eq!(result.history, vec![TradeState::Unsigned, TradeState::Failed]);
    assert_eq!(aggregator.build_calls(), 0);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_prepare_rejects_invalid_payer() {
    let transport = Arc::new(MockRpcTransport::new());
    let aggregator = Arc::new(MockAggregator::new());
    let err = executor(&transport, &aggregator)
        .prepare(&sol_to_usdc(), "not-a-key")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(aggregator.quote_calls(), 0);
}
