use super::{action, MatchPolicy, MatchType, Rate, RateFilter, Side};
use crate::domain::codec::{decode_float, ORDER_FLOAT_BITS};
use crate::domain::trade_math::TradeMath;
use crate::shared::protocol::{EncodedOrder, MatchAction, OrdersMap, StrategyId};
use crate::shared::uint::{mul_div_floor, to_u128, u256, MAX_UINT128};
use alloy_primitives::U256;
use smallvec::SmallVec;

/// Batch policy: allocates across a bounded set of the deepest orders at a
/// single clearing price.
///
/// Orders are ranked by how much of the request they can absorb and taken
/// until their combined capacity covers the amount (or `max_orders` is
/// reached). When the amount falls strictly inside that capacity, an integer
/// bisection over the square-root marginal price finds the lowest price at
/// which the orders, each traded down to that price, absorb no more than the
/// amount. The leftover is assigned in rate order.
#[derive(Debug, Clone, Copy)]
pub struct BestMatch {
    math: TradeMath,
    max_orders: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: StrategyId,
    order: EncodedOrder,
    /// Fill at full capacity, in request units
    capacity: Rate,
    a: U256,
    b: U256,
    /// Current square-root marginal price
    marginal: U256,
}

type Selection = SmallVec<[Candidate; 16]>;

impl Default for BestMatch {
    fn default() -> Self {
        Self::new(TradeMath::default(), 16)
    }
}

impl BestMatch {
    pub fn new(math: TradeMath, max_orders: usize) -> Self {
        Self { math, max_orders: max_orders.max(1) }
    }

    fn candidate(&self, id: StrategyId, order: &EncodedOrder, side: Side) -> Option<Candidate> {
        let capacity = match side {
            Side::Source => {
                let full = self.math.source_from_target(order.y, order);
                if full == MAX_UINT128 {
                    return None;
                }
                side.trade(&self.math, full, order)
            }
            Side::Target => side.trade(&self.math, order.y, order),
        };
        if capacity.input == 0 || capacity.output == 0 || !side.is_usable(&capacity) {
            return None;
        }

        let a = decode_float(order.a, ORDER_FLOAT_BITS);
        let b = decode_float(order.b, ORDER_FLOAT_BITS);
        let marginal = if order.y == order.z || order.z == 0 {
            b.saturating_add(a)
        } else {
            b.saturating_add(mul_div_floor(a, u256(order.y), u256(order.z)).unwrap_or(U256::MAX))
        };
        Some(Candidate { id, order: *order, capacity, a, b, marginal })
    }

    /// Deepest orders first, stopping once their capacity covers `amount`.
    fn select(&self, amount: u128, orders: &OrdersMap, side: Side) -> Selection {
        let mut candidates: Vec<Candidate> = orders
            .iter()
            .filter_map(|(id, order)| self.candidate(*id, order, side))
            .collect();
        candidates.sort_by(|a, b| b.capacity.input.cmp(&a.capacity.input));

        let mut selected = Selection::new();
        let mut covered: u128 = 0;
        for candidate in candidates {
            if selected.len() >= self.max_orders || covered >= amount {
                break;
            }
            covered = covered.saturating_add(candidate.capacity.input);
            selected.push(candidate);
        }
        selected
    }

    /// Target liquidity left in an order once its price is pushed down to `price`.
    fn remaining_at(candidate: &Candidate, price: U256) -> u128 {
        let y = candidate.order.y;
        if price >= candidate.marginal {
            return y;
        }
        if price <= candidate.b {
            return 0;
        }
        mul_div_floor(u256(candidate.order.z), price - candidate.b, candidate.a)
            .and_then(to_u128)
            .map_or(y, |remaining| remaining.min(y))
    }

    /// Request units an order absorbs when traded down to `price`.
    fn absorbed_at(&self, candidate: &Candidate, price: U256, side: Side) -> u128 {
        let consumed = candidate.order.y - Self::remaining_at(candidate, price);
        match side {
            Side::Source => self
                .math
                .source_from_target(consumed, &candidate.order)
                .min(candidate.capacity.input),
            Side::Target => consumed.min(candidate.capacity.input),
        }
    }

    fn absorbed_total(&self, selected: &Selection, price: U256, side: Side) -> u128 {
        selected
            .iter()
            .fold(0u128, |total, candidate| total.saturating_add(self.absorbed_at(candidate, price, side)))
    }

    /// Lowest price at which the selection absorbs no more than `amount`.
    fn clearing_price(&self, amount: u128, selected: &Selection, side: Side) -> U256 {
        let one = U256::from(1u8);
        let mut low = selected
            .iter()
            .map(|c| c.b)
            .min()
            .unwrap_or(U256::ZERO)
            .saturating_sub(one);
        let mut high = selected.iter().map(|c| c.marginal).max().unwrap_or(U256::ZERO);

        // 不变式: absorbed(low) > amount >= absorbed(high)
        while high > low && high - low > one {
            let mid = low + (high - low) / U256::from(2u8);
            if self.absorbed_total(selected, mid, side) <= amount {
                high = mid;
            } else {
                low = mid;
            }
        }
        high
    }

    fn solve(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>, side: Side) -> Vec<MatchAction> {
        if amount == 0 {
            return Vec::new();
        }
        let selected = self.select(amount, orders, side);
        let total = selected
            .iter()
            .fold(0u128, |total, c| total.saturating_add(c.capacity.input));

        let mut allocations: SmallVec<[u128; 16]> = if total <= amount {
            selected.iter().map(|c| c.capacity.input).collect()
        } else {
            let price = self.clearing_price(amount, &selected, side);
            selected.iter().map(|c| self.absorbed_at(c, price, side)).collect()
        };

        // 按价格优先级分配剩余金额
        let mut order: SmallVec<[usize; 16]> = (0..selected.len()).collect();
        order.sort_by(|&i, &j| side.compare(&selected[i].capacity, &selected[j].capacity));

        let allocated = allocations.iter().fold(0u128, |t, a| t.saturating_add(*a));
        let mut residual = amount.saturating_sub(allocated);
        for &i in &order {
            if residual == 0 {
                break;
            }
            let extra = residual.min(selected[i].capacity.input - allocations[i]);
            allocations[i] += extra;
            residual -= extra;
        }

        let mut actions = Vec::with_capacity(selected.len());
        for &i in &order {
            if allocations[i] == 0 {
                continue;
            }
            let candidate = &selected[i];
            let rate = if allocations[i] == candidate.capacity.input {
                candidate.capacity
            } else {
                side.trade(&self.math, allocations[i], &candidate.order)
            };
            if side.is_usable(&rate) && filter(&rate) {
                actions.push(action(candidate.id, rate));
            }
        }

        // 按实际成交价格排序，而非满仓价格
        side.sort_actions(&mut actions);
        actions
    }
}

impl MatchPolicy for BestMatch {
    fn match_type(&self) -> MatchType {
        MatchType::Best
    }

    fn match_by_source_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.solve(amount, orders, filter, Side::Source)
    }

    fn match_by_target_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.solve(amount, orders, filter, Side::Target)
    }
}
