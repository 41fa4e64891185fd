//! Fast vs Best 撮合策略性能对比

use alloy_primitives::U256;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use curve_engine::domain::codec::encode_order;
use curve_engine::domain::matching::{default_filter, MatchConfig, MatchType, MatchingEngine};
use curve_engine::domain::trade_math::TradeMath;
use curve_engine::shared::protocol::{DecodedOrder, OrdersMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

fn generate_orders(count: usize) -> OrdersMap {
    let mut rng = StdRng::seed_from_u64(count as u64);
    (0..count)
        .map(|i| {
            let low = rng.gen_range(500_000..=1_000_000i64);
            let high = rng.gen_range(low + 1..=2_000_000i64);
            let order = DecodedOrder {
                liquidity: Decimal::from(rng.gen_range(1_000_000_000i64..=10_000_000_000)),
                lowest_rate: Decimal::new(low, 6),
                highest_rate: Decimal::new(high, 6),
                marginal_rate: Decimal::new(high, 6),
            };
            // 生成的订单总是合法的
            (U256::from(i), encode_order(&order).unwrap())
        })
        .collect()
}

fn bench_policy(c: &mut Criterion, match_type: MatchType) {
    let mut group = c.benchmark_group(format!("{} match", match_type.as_str()));
    let engine = MatchingEngine::new(MatchConfig { match_type, ..MatchConfig::default() }, TradeMath::default());

    for count in [10, 100, 1000] {
        let orders = generate_orders(count);
        let liquidity: u128 = orders.values().map(|order| order.y).sum();
        // 约一半的总流动性，迫使撮合跨越多个订单
        let amount = liquidity / 2;

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("by_source", count), &orders, |b, orders| {
            b.iter(|| engine.match_by_source_amount(black_box(amount), orders, &default_filter));
        });
        group.bench_with_input(BenchmarkId::new("by_target", count), &orders, |b, orders| {
            b.iter(|| engine.match_by_target_amount(black_box(amount), orders, &default_filter));
        });
    }
    group.finish();
}

fn bench_fast(c: &mut Criterion) {
    bench_policy(c, MatchType::Fast);
}

fn bench_best(c: &mut Criterion) {
    bench_policy(c, MatchType::Best);
}

fn bench_trade_math(c: &mut Criterion) {
    let orders = generate_orders(1);
    let order = orders.values().next().copied().unwrap_or_default();
    let math = TradeMath::default();

    let mut group = c.benchmark_group("trade math");
    group.bench_function("target_from_source", |b| {
        b.iter(|| math.target_from_source(black_box(order.y / 3), &order));
    });
    group.bench_function("source_from_target", |b| {
        b.iter(|| math.source_from_target(black_box(order.y / 3), &order));
    });
    group.finish();
}

criterion_group!(benches, bench_fast, bench_best, bench_trade_math);
criterion_main!(benches);
