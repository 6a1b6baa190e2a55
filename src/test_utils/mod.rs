//! Test fixtures and mocks shared by unit and integration tests.

pub mod mocks;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{Message, VersionedMessage, v0};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature as SolanaSignature;
use solana_sdk::transaction::VersionedTransaction;

use crate::domain::envelope::SIGNATURE_LEN;
use crate::domain::{EncodingVariant, Signature, TransactionEnvelope};
use crate::infra::rpc::{
    ConnectionPool, Endpoint, EndpointRotator, RetryConfig, RetryPolicy, RpcClient, ThrottleConfig,
    ThrottleGate,
};

pub use mocks::{MockAggregator, MockRpcTransport, MockSigner, MockTransportFactory, RecordedBuild};

/// Fee payer used by the mock signer and sample envelopes
pub const TEST_PAYER: &str = "83astBRguLMdt2h5U1Tpdq5tjFoJ6noeGwaY3mDLVcri";

pub const MOCK_ENDPOINT: &str = "http://mock-rpc.local";

pub fn test_payer() -> Pubkey {
    Pubkey::from_str(TEST_PAYER).expect("valid pubkey")
}

/// Unsigned transaction with one instruction, signed only by `payer`
pub fn sample_transaction(encoding: EncodingVariant, payer: &Pubkey) -> Vec<u8> {
    let program = Pubkey::new_from_array([0x11; 32]);
    let instruction = Instruction::new_with_bytes(program, &[1, 2, 3], vec![AccountMeta::new(*payer, true)]);
    let blockhash = Hash::new_from_array([0x22; 32]);
    let message = match encoding {
        EncodingVariant::Legacy => {
            VersionedMessage::Legacy(Message::new_with_blockhash(&[instruction], Some(payer), &blockhash))
        }
        EncodingVariant::Versioned(_) => VersionedMessage::V0(
            v0::Message::try_compile(payer, &[instruction], &[], blockhash).expect("v0 message compiles"),
        ),
    };
    let signers = usize::from(message.header().num_required_signatures);
    let transaction = VersionedTransaction {
        signatures: vec![SolanaSignature::default(); signers],
        message,
    };
    bincode::serialize(&transaction).expect("transaction serializes")
}

pub fn sample_envelope(encoding: EncodingVariant) -> TransactionEnvelope {
    TransactionEnvelope::from_bytes(sample_transaction(encoding, &test_payer()), Some(1_000))
        .expect("sample transaction parses")
}

pub fn test_signature() -> Signature {
    Signature::from_bytes(&[3u8; SIGNATURE_LEN])
}

/// Single-endpoint client over `transport` with no request spacing
pub fn mock_rpc_client(transport: Arc<MockRpcTransport>) -> Arc<RpcClient> {
    mock_rpc_client_with(
        transport,
        ThrottleConfig {
            max_concurrent: 5,
            min_interval: Duration::ZERO,
        },
        RetryConfig::default(),
    )
}

pub fn mock_rpc_client_with(
    transport: Arc<MockRpcTransport>,
    throttle: ThrottleConfig,
    retry: RetryConfig,
) -> Arc<RpcClient> {
    let endpoint = Endpoint::parse(MOCK_ENDPOINT).expect("valid endpoint");
    let rotator = EndpointRotator::new(vec![endpoint]).expect("one endpoint");
    let pool = ConnectionPool::new(
        rotator,
        CommitmentConfig::confirmed(),
        Arc::new(MockTransportFactory::with_transport(transport)),
    );
    Arc::new(RpcClient::new(
        Arc::new(pool),
        Arc::new(ThrottleGate::new(throttle)),
        RetryPolicy::new(retry),
    ))
}
