use alloy_primitives::U256;
use curve_engine::domain::codec::encode_order;
use curve_engine::domain::matching::{default_filter, MatchConfig, MatchType, MatchingEngine, Rate, TradeBy};
use curve_engine::domain::trade_math::TradeMath;
use curve_engine::shared::protocol::{DecodedOrder, EncodedOrder, MatchAction, OrdersMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// 随机曲线订单，量级保持在无需缩放的范围内
fn random_order(rng: &mut StdRng) -> EncodedOrder {
    let low = rng.gen_range(1..=1_000_000_000i64);
    let high = rng.gen_range(low..=1_000_000_000i64);
    let step = rng.gen_range(1..=10i64);
    let mut marginal = low + (high - low) * step / 10;
    if marginal == low && high > low {
        marginal = high;
    }
    let order = DecodedOrder {
        liquidity: Decimal::from(rng.gen_range(1_000_000..=1_000_000_000i64)),
        lowest_rate: Decimal::new(low, 6),
        highest_rate: Decimal::new(high, 6),
        marginal_rate: Decimal::new(marginal, 6),
    };
    encode_order(&order).unwrap()
}

fn random_orders(rng: &mut StdRng, count: usize) -> OrdersMap {
    (0..count).map(|i| (U256::from(i), random_order(rng))).collect()
}

/// 价格互不相同的限价单：价格为 0.5, 0.6, ... 每个流动性 100 万
fn limit_orders(count: usize) -> OrdersMap {
    (0..count)
        .map(|i| {
            let price = Decimal::new(5 + i as i64, 1);
            let order = DecodedOrder {
                liquidity: Decimal::from(1_000_000),
                lowest_rate: price,
                highest_rate: price,
                marginal_rate: price,
            };
            (U256::from(i), encode_order(&order).unwrap())
        })
        .collect()
}

fn engine(match_type: MatchType) -> MatchingEngine {
    MatchingEngine::new(MatchConfig { match_type, ..MatchConfig::default() }, TradeMath::default())
}

fn assert_conserving(actions: &[MatchAction], amount: u128, orders: &OrdersMap, by: TradeBy) {
    let math = TradeMath::default();
    let total = actions.iter().fold(0u128, |t, a| t + a.input);
    assert!(total <= amount, "matched {total} of {amount}");
    for action in actions {
        let order = &orders[&action.id];
        match by {
            TradeBy::Source => {
                assert!(action.output <= order.y);
                assert_eq!(action.output, math.target_from_source(action.input, order));
            }
            TradeBy::Target => {
                assert!(action.input <= order.y);
                assert_eq!(action.output, math.source_from_target(action.input, order));
            }
        }
    }
}

#[test]
fn test_trade_math_monotonic() {
    let math = TradeMath::default();
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..200 {
        let order = random_order(&mut rng);
        let mut amounts: Vec<u128> = (0..20).map(|_| rng.gen_range(0..=order.y * 2)).collect();
        amounts.sort_unstable();
        for pair in amounts.windows(2) {
            assert!(math.target_from_source(pair[0], &order) <= math.target_from_source(pair[1], &order));
            assert!(math.source_from_target(pair[0], &order) <= math.source_from_target(pair[1], &order));
        }
    }
}

#[test]
fn test_trade_math_round_trip_never_favors_trader() {
    let math = TradeMath::default();
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..200 {
        let order = random_order(&mut rng);
        let x = rng.gen_range(0..=order.y);

        // 花费 x 换到的目标量，反算所需源量不超过 x
        let target = math.target_from_source(x, &order);
        assert!(math.source_from_target(target, &order) <= x);

        // 为买到 x 支付的源量，至少能换回 x
        let source = math.source_from_target(x, &order);
        if source != u128::MAX {
            assert!(math.target_from_source(source, &order) >= x);
        }
    }
}

#[test]
fn test_matching_conserves_amount() {
    let mut rng = StdRng::seed_from_u64(3);
    for match_type in [MatchType::Fast, MatchType::Best] {
        let engine = engine(match_type);
        for _ in 0..50 {
            let count = rng.gen_range(1..=12);
            let orders = random_orders(&mut rng, count);
            let liquidity = orders.values().fold(0u128, |t, o| t + o.y);
            let amount = rng.gen_range(1..=liquidity * 2);
            for by in [TradeBy::Source, TradeBy::Target] {
                let actions = engine.match_orders(amount, &orders, by, &default_filter);
                assert_conserving(&actions, amount, &orders, by);
            }
        }
    }
}

fn assert_rate_order(actions: &[MatchAction], by: TradeBy) {
    for pair in actions.windows(2) {
        let lhs = pair[0].output * pair[1].input;
        let rhs = pair[1].output * pair[0].input;
        match by {
            // a.output / a.input >= b.output / b.input
            TradeBy::Source => assert!(lhs >= rhs, "{actions:?}"),
            TradeBy::Target => assert!(lhs <= rhs, "{actions:?}"),
        }
    }
}

#[test]
fn test_source_rates_non_increasing() {
    let orders = limit_orders(8);
    for match_type in [MatchType::Fast, MatchType::Best] {
        let actions = engine(match_type).match_by_source_amount(3_000_000, &orders, &default_filter);
        assert!(actions.len() >= 2);
        assert_rate_order(&actions, TradeBy::Source);
    }

    // 最优价格的订单先被吃满
    let actions = engine(MatchType::Fast).match_by_source_amount(3_000_000, &orders, &default_filter);
    assert_eq!(actions[0].id, U256::from(7u8));
    assert!(actions[0].output <= 1_000_000 && actions[0].output >= 999_998);
}

#[test]
fn test_target_rates_non_decreasing() {
    let orders = limit_orders(8);
    for match_type in [MatchType::Fast, MatchType::Best] {
        let actions = engine(match_type).match_by_target_amount(2_500_000, &orders, &default_filter);
        assert_eq!(actions.iter().map(|a| a.input).sum::<u128>(), 2_500_000);
        assert_rate_order(&actions, TradeBy::Target);
    }
}

#[test]
fn test_rate_order_on_range_orders() {
    let mut rng = StdRng::seed_from_u64(5);
    for match_type in [MatchType::Fast, MatchType::Best] {
        let engine = engine(match_type);
        for _ in 0..200 {
            let orders = random_orders(&mut rng, 6);
            let liquidity = orders.values().fold(0u128, |t, o| t + o.y);
            let amount = rng.gen_range(1..=liquidity / 2);
            for by in [TradeBy::Source, TradeBy::Target] {
                let actions = engine.match_orders(amount, &orders, by, &default_filter);
                assert_rate_order(&actions, by);
            }
        }
    }
}

#[test]
fn test_filter_limits_accepted_fills() {
    let orders = limit_orders(8);
    // 只接受价格不低于 1.0 的成交
    let at_least_one = |rate: &Rate| rate.input > 0 && rate.output >= rate.input;
    for match_type in [MatchType::Fast, MatchType::Best] {
        let actions = engine(match_type).match_by_source_amount(10_000_000, &orders, &at_least_one);
        assert!(!actions.is_empty());
        assert!(actions.iter().all(|a| a.output >= a.input));
    }
}

#[test]
fn test_best_fills_target_amount_within_liquidity() {
    let mut rng = StdRng::seed_from_u64(4);
    let engine = engine(MatchType::Best);
    for _ in 0..30 {
        let count = rng.gen_range(2..=10);
        let orders = random_orders(&mut rng, count);
        let liquidity = orders.values().fold(0u128, |t, o| t + o.y);
        let amount = rng.gen_range(1..liquidity);
        let actions = engine.match_by_target_amount(amount, &orders, &default_filter);
        assert_conserving(&actions, amount, &orders, TradeBy::Target);
        assert_eq!(actions.iter().map(|a| a.input).sum::<u128>(), amount);
    }
}
