//! Matching Engine
//!
//! Selects resting orders and per-order fill amounts for a requested trade.
//! Two interchangeable policies implement [`MatchPolicy`]:
//!
//! - [`FastMatch`]: greedy walk over orders sorted by achievable rate
//! - [`BestMatch`]: batch allocation over a bounded subset of orders at a
//!   single clearing price found by bisection
//!
//! [`MatchingEngine`] dispatches to one of them according to [`MatchType`].
//!
//! Amounts are expressed in the units of the request: a source-amount match
//! returns `input` in source token units and `output` in target token units,
//! a target-amount match the other way round.

mod best;
mod fast;

pub use best::BestMatch;
pub use fast::FastMatch;

use crate::domain::trade_math::TradeMath;
use crate::shared::protocol::{EncodedOrder, MatchAction, OrdersMap, StrategyId};
use crate::shared::uint::{u256, MAX_UINT128};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An `(input, output)` pair achievable against one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rate {
    pub input: u128,
    pub output: u128,
}

/// Predicate deciding whether a candidate fill is acceptable.
pub type RateFilter<'a> = &'a dyn Fn(&Rate) -> bool;

/// Accepts fills where both sides are strictly positive.
pub fn default_filter(rate: &Rate) -> bool {
    rate.input > 0 && rate.output > 0
}

/// Which side of the trade the requested amount denominates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeBy {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Fast,
    Best,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Fast => "fast",
            MatchType::Best => "best",
        }
    }
}

/// A matching algorithm.
pub trait MatchPolicy: Send + Sync {
    fn match_type(&self) -> MatchType;

    /// Spends up to `amount` of source token across `orders`.
    fn match_by_source_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction>;

    /// Buys up to `amount` of target token across `orders`.
    fn match_by_target_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction>;

    fn match_orders(
        &self,
        amount: u128,
        orders: &OrdersMap,
        by: TradeBy,
        filter: RateFilter<'_>,
    ) -> Vec<MatchAction> {
        match by {
            TradeBy::Source => self.match_by_source_amount(amount, orders, filter),
            TradeBy::Target => self.match_by_target_amount(amount, orders, filter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchConfig {
    pub match_type: MatchType,
    /// Upper bound on the number of orders the best policy allocates across
    pub best_max_orders: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_type: MatchType::Fast,
            best_max_orders: 16,
        }
    }
}

/// Dispatches match requests to the configured policy.
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    config: MatchConfig,
    fast: FastMatch,
    best: BestMatch,
}

impl MatchingEngine {
    pub fn new(config: MatchConfig, math: TradeMath) -> Self {
        Self {
            config,
            fast: FastMatch::new(math),
            best: BestMatch::new(math, config.best_max_orders),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// The policy selected by the configuration.
    pub fn policy(&self) -> &dyn MatchPolicy {
        self.policy_for(self.config.match_type)
    }

    pub fn policy_for(&self, match_type: MatchType) -> &dyn MatchPolicy {
        match match_type {
            MatchType::Fast => &self.fast,
            MatchType::Best => &self.best,
        }
    }

    pub fn match_by_source_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.policy().match_by_source_amount(amount, orders, filter)
    }

    pub fn match_by_target_amount(&self, amount: u128, orders: &OrdersMap, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.policy().match_by_target_amount(amount, orders, filter)
    }

    pub fn match_orders(&self, amount: u128, orders: &OrdersMap, by: TradeBy, filter: RateFilter<'_>) -> Vec<MatchAction> {
        self.policy().match_orders(amount, orders, by, filter)
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(MatchConfig::default(), TradeMath::default())
    }
}

/// Fill achievable by offering up to `amount` of source.
///
/// The output is clipped to the order's liquidity: when the curve would hand
/// out more than `y`, the input is recomputed from `y` and then decremented
/// until the output fits.
pub(crate) fn rate_by_source_amount(math: &TradeMath, amount: u128, order: &EncodedOrder) -> Rate {
    let output = math.target_from_source(amount, order);
    if output <= order.y && (output > 0 || amount == 0) {
        return Rate { input: amount, output };
    }

    let input = math.source_from_target(order.y, order);
    if input == MAX_UINT128 {
        return Rate::default();
    }
    let mut input = input.min(amount);
    let mut output = math.target_from_source(input, order);
    while output > order.y && input > 0 {
        input -= 1;
        output = math.target_from_source(input, order);
    }
    Rate { input, output }
}

/// Source required to buy up to `amount` of target, capped at the order's liquidity.
pub(crate) fn rate_by_target_amount(math: &TradeMath, amount: u128, order: &EncodedOrder) -> Rate {
    let input = amount.min(order.y);
    Rate { input, output: math.source_from_target(input, order) }
}

/// Orders by descending `output / input`, larger output first on ties.
pub(crate) fn compare_by_max_rate(a: &Rate, b: &Rate) -> Ordering {
    let lhs = u256(a.output) * u256(b.input);
    let rhs = u256(b.output) * u256(a.input);
    rhs.cmp(&lhs).then_with(|| b.output.cmp(&a.output))
}

/// Orders by ascending `output / input`, larger output first on ties.
pub(crate) fn compare_by_min_rate(a: &Rate, b: &Rate) -> Ordering {
    let lhs = u256(a.output) * u256(b.input);
    let rhs = u256(b.output) * u256(a.input);
    lhs.cmp(&rhs).then_with(|| b.output.cmp(&a.output))
}

/// Per-direction behavior shared by both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Source,
    Target,
}

impl Side {
    pub(crate) fn trade(&self, math: &TradeMath, amount: u128, order: &EncodedOrder) -> Rate {
        match self {
            Side::Source => rate_by_source_amount(math, amount, order),
            Side::Target => rate_by_target_amount(math, amount, order),
        }
    }

    pub(crate) fn compare(&self, a: &Rate, b: &Rate) -> Ordering {
        match self {
            Side::Source => compare_by_max_rate(a, b),
            Side::Target => compare_by_min_rate(a, b),
        }
    }

    /// Orders actions best achieved rate first.
    pub(crate) fn sort_actions(&self, actions: &mut [MatchAction]) {
        actions.sort_by(|a, b| {
            let lhs = Rate { input: a.input, output: a.output };
            let rhs = Rate { input: b.input, output: b.output };
            self.compare(&lhs, &rhs)
        });
    }

    /// Sentinel outputs mark an order as unusable at that size.
    pub(crate) fn is_usable(&self, rate: &Rate) -> bool {
        match self {
            Side::Source => true,
            Side::Target => rate.output != MAX_UINT128,
        }
    }
}

pub(crate) fn action(id: StrategyId, rate: Rate) -> MatchAction {
    MatchAction { id, input: rate.input, output: rate.output }
}
