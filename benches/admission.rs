// Admission path benchmarks (Criterion)
//
// Key paths measured:
// - full check_request_allowed against the default limits
// - check_and_record under a growing set of user keys
// - raw token bucket and sliding window decisions
//
// Usage:
//   cargo bench --bench admission

use budgetguard::quota::{QuotaManager, QuotaManagerConfig};
use budgetguard::rate_limit::{RateLimitConfig, RateLimitStrategy, SlidingWindowCounter, TokenBucket};
use budgetguard::types::{RequestContext, RequestType};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn bench_manager() -> QuotaManager {
    QuotaManager::new(QuotaManagerConfig {
        rate_limit: RateLimitConfig::new(u32::MAX, 60_000, RateLimitStrategy::TokenBucket),
        ..QuotaManagerConfig::default()
    })
    .expect("default config is valid")
}

/// Benchmark: single-user admission check
fn bench_check_request_allowed(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let manager = bench_manager();
    let ctx = RequestContext::for_user("bench");

    c.bench_function("check_request_allowed", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    manager
                        .check_request_allowed(&RequestType::ApiCall, black_box(1.0), &ctx)
                        .await,
                )
            })
        })
    });
}

/// Benchmark: check and record spread across N users
fn bench_check_and_record_users(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("check_and_record");

    for users in [1usize, 10, 100].iter() {
        let manager = bench_manager();
        let contexts: Vec<RequestContext> = (0..*users)
            .map(|i| RequestContext::for_user(format!("user-{}", i)))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(users), users, |b, _| {
            let mut next = 0usize;
            b.iter(|| {
                let ctx = &contexts[next % contexts.len()];
                next += 1;
                rt.block_on(async {
                    black_box(manager.check_and_record(&RequestType::Cost, 0.0001, ctx).await)
                })
            })
        });
    }

    group.finish();
}

/// Benchmark: limiter primitives without locking
fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives");

    group.bench_function("token_bucket", |b| {
        let mut bucket = TokenBucket::new(1_000_000, 1_000_000.0);
        b.iter(|| black_box(bucket.try_consume(1)))
    });

    group.bench_function("sliding_window", |b| {
        let mut window = SlidingWindowCounter::new(10_000, Duration::from_millis(10));
        b.iter(|| black_box(window.is_allowed()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_check_request_allowed,
    bench_check_and_record_users,
    bench_primitives
);
criterion_main!(benches);
