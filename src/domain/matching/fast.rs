use super::{action, MatchPolicy, MatchType, Rate, RateFilter, Side};
use crate::domain::trade_math::TradeMath;
use crate::shared::protocol::{EncodedOrder, MatchAction, OrdersMap, StrategyId};

/// Greedy policy: orders are ranked by the rate achievable with the whole
/// amount, then consumed best-first until the amount is spent.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastMatch {
    math: TradeMath,
}

struct Candidate<'a> {
    id: StrategyId,
    order: &'a EncodedOrder,
    rate: Rate,
}

impl FastMatch {
    pub fn new(math: TradeMath) -> Self {
        Self { math }
    }

    fn sorted_candidates<'a>(&self, amount: u128, orders: &'a OrdersMap, side: Side) -> Vec<Candidate<'a>> {
        let mut candidates: Vec<Candidate<'a>> = orders
            .iter()
            .map(|(id, order)| Candidate { id: *id, order, rate: side.trade(&self.math, amount, order) })
            .filter(|candidate| side.is_usable(&candidate.rate))
            .collect();
        // 稳定排序，同价同量时保持ID顺序
        candidates.sort_by(|a, b| side.compare(&a.rate, &b.rate));
        candidates
    }

    fn walk(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>, side: Side) -> Vec<MatchAction> {
        let mut remaining = amount;
        let mut actions = Vec::new();

        for candidate in self.sorted_candidates(amount, orders, side) {
            if remaining == 0 {
                break;
            }
            if candidate.rate.input <= remaining {
                if filter(&candidate.rate) {
                    actions.push(action(candidate.id, candidate.rate));
                    remaining -= candidate.rate.input;
                }
                continue;
            }

            // 剩余金额不足以吃满该订单：按剩余金额重新计算，被拒绝时尝试下一个订单
            let adjusted = side.trade(&self.math, remaining, candidate.order);
            if side.is_usable(&adjusted) && filter(&adjusted) {
                actions.push(action(candidate.id, adjusted));
                break;
            }
        }

        // 部分成交的价格可能优于之前吃满的订单
        side.sort_actions(&mut actions);
        actions
    }
}

impl MatchPolicy for FastMatch {
    fn match_type(&self) -> MatchType {
        MatchType::Fast
    }

    fn match_by_source_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.walk(amount, orders, filter, Side::Source)
    }

    fn match_by_target_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.walk(amount, orders, filter, Side::Target)
    }
}
