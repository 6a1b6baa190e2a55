use criterion::{Criterion, criterion_group, criterion_main};
use solana_swap_executor::domain::{EncodingVariant, ErrorClass, TradeParams, TransactionEnvelope};
use solana_swap_executor::domain::types::{SOL_MINT, USDC_MINT};
use solana_swap_executor::infra::rpc::RetryPolicy;
use solana_swap_executor::test_utils::{sample_transaction, test_payer};
use std::hint::black_box;

fn bench_backoff(c: &mut Criterion) {
    let policy = RetryPolicy::default();

    c.bench_function("backoff_delay_rate_limit", |b| {
        b.iter(|| {
            for attempt in 0..5 {
                black_box(policy.backoff_delay_with_jitter(ErrorClass::RateLimit, black_box(attempt), 0.5));
            }
        })
    });
}

fn bench_envelope(c: &mut Criterion) {
    let raw = sample_transaction(EncodingVariant::V0, &test_payer());

    c.bench_function("parse_envelope_v0", |b| {
        b.iter(|| {
            let envelope = TransactionEnvelope::from_bytes(black_box(raw.clone()), Some(1)).unwrap();
            black_box(envelope.fee_payer());
        })
    });
}

fn bench_validation(c: &mut Criterion) {
    let params = TradeParams::new(SOL_MINT, USDC_MINT, 1_000_000_000);

    c.bench_function("check_trade_params", |b| {
        b.iter(|| {
            let _ = black_box(&params).check();
        })
    });
}

criterion_group!(benches, bench_backoff, bench_envelope, bench_validation);
criterion_main!(benches);
