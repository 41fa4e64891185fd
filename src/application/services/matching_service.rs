/// Matching Service - Market Queries over the Order Cache
///
/// Answers liquidity, rate and trade questions for a token pair by reading
/// the shared [`ChainCache`](crate::domain::cache::ChainCache) and running the
/// configured match policy.
///
/// ## Architecture
/// - Orders are copied out of the cache under a short read lock, so matching
///   never blocks the sync driver
/// - The policy is chosen through [`MatchConfig`]; both policies share one
///   [`TradeMath`]
/// - Quotes apply the pair's trading fee: subtracted from the target side of
///   a by-source trade, added to the source side of a by-target trade
///
/// ## Usage
/// ```rust,ignore
/// let service = MatchingService::new(cache.clone(), MatchConfig::default(), TradeMath::default());
/// let quote = service.quote_trade(usdc, eth, 1_000_000, TradeBy::Source)?;
/// ```

use crate::domain::cache::SharedCache;
use crate::domain::codec::{decode_order, decode_strategy, CodecError};
use crate::domain::matching::{default_filter, MatchConfig, MatchingEngine, RateFilter, TradeBy};
use crate::domain::trade_math::{add_fee, subtract_fee, TradeMath};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{
    u128_string, DecodedStrategy, EncodedStrategy, MatchAction, OrdersMap, StrategyId, TokenPair,
};
use crate::shared::uint::MAX_UINT128;
use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("pair {0} is not cached")]
    PairNotCached(TokenPair),

    #[error("strategy {0} not found")]
    StrategyNotFound(StrategyId),

    #[error("trading fee for pair {0} is unknown")]
    FeeUnknown(TokenPair),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A priced trade, ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeQuote {
    pub actions: Vec<MatchAction>,
    /// Source tokens the trader pays, fee included for by-target trades
    #[serde(with = "u128_string")]
    pub source_amount: u128,
    /// Target tokens the trader receives, fee deducted for by-source trades
    #[serde(with = "u128_string")]
    pub target_amount: u128,
    pub trading_fee_ppm: u32,
    /// Whether the whole requested amount found liquidity
    pub fully_matched: bool,
}

pub struct MatchingService {
    cache: SharedCache,
    engine: MatchingEngine,
    math: TradeMath,
}

impl MatchingService {
    pub fn new(cache: SharedCache, config: MatchConfig, math: TradeMath) -> Self {
        Self { cache, engine: MatchingEngine::new(config, math), math }
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    pub fn get_strategy_by_id(&self, id: StrategyId) -> Result<EncodedStrategy, MarketError> {
        self.cache.read().get_strategy_by_id(id).ok_or(MarketError::StrategyNotFound(id))
    }

    pub fn get_decoded_strategy_by_id(&self, id: StrategyId) -> Result<DecodedStrategy, MarketError> {
        Ok(decode_strategy(&self.get_strategy_by_id(id)?)?)
    }

    pub fn get_strategies_by_pair(&self, token0: Address, token1: Address) -> Result<Vec<EncodedStrategy>, MarketError> {
        self.cache
            .read()
            .get_strategies_by_pair(token0, token1)
            .ok_or_else(|| MarketError::PairNotCached(TokenPair::new(token0, token1)))
    }

    pub fn get_decoded_strategies_by_pair(
        &self,
        token0: Address,
        token1: Address,
    ) -> Result<Vec<DecodedStrategy>, MarketError> {
        self.get_strategies_by_pair(token0, token1)?
            .iter()
            .map(|strategy| decode_strategy(strategy).map_err(MarketError::from))
            .collect()
    }

    /// Total target tokens offered for `source`.
    pub fn get_liquidity_by_pair(&self, source: Address, target: Address) -> Result<u128, MarketError> {
        let orders = self.orders(source, target)?;
        Ok(orders.values().fold(0u128, |total, order| total.saturating_add(order.y)))
    }

    pub fn has_liquidity_by_pair(&self, source: Address, target: Address) -> Result<bool, MarketError> {
        Ok(self.orders(source, target)?.values().any(|order| order.y > 0))
    }

    /// Source tokens needed to drain every order selling `target`.
    ///
    /// Orders whose full drain is not computable are left out.
    pub fn get_max_source_amount_by_pair(&self, source: Address, target: Address) -> Result<u128, MarketError> {
        let orders = self.orders(source, target)?;
        Ok(orders
            .values()
            .filter(|order| order.y > 0)
            .map(|order| self.math.source_from_target(order.y, order))
            .filter(|amount| *amount != MAX_UINT128)
            .fold(0u128, |total, amount| total.saturating_add(amount)))
    }

    /// Lowest and highest marginal rate (target per source) among orders
    /// with liquidity, or `None` when nothing is offered.
    pub fn get_rate_range_by_pair(
        &self,
        source: Address,
        target: Address,
    ) -> Result<Option<(Decimal, Decimal)>, MarketError> {
        let orders = self.orders(source, target)?;
        let mut range: Option<(Decimal, Decimal)> = None;
        for order in orders.values().filter(|order| order.y > 0) {
            let rate = decode_order(order)?.marginal_rate;
            range = Some(match range {
                Some((low, high)) => (low.min(rate), high.max(rate)),
                None => (rate, rate),
            });
        }
        Ok(range)
    }

    pub fn get_match_actions(
        &self,
        source: Address,
        target: Address,
        amount: u128,
        by: TradeBy,
        filter: RateFilter<'_>,
    ) -> Result<Vec<MatchAction>, MarketError> {
        let orders = self.orders(source, target)?;
        let policy = self.engine.policy();
        let timer = METRICS
            .match_duration
            .with_label_values(&[policy.match_type().as_str()])
            .start_timer();
        let actions = policy.match_orders(amount, &orders, by, filter);
        timer.observe_duration();

        debug!(
            policy = policy.match_type().as_str(),
            orders = orders.len(),
            actions = actions.len(),
            amount,
            "matched orders"
        );
        Ok(actions)
    }

    pub fn quote_trade(
        &self,
        source: Address,
        target: Address,
        amount: u128,
        by: TradeBy,
    ) -> Result<TradeQuote, MarketError> {
        let pair = TokenPair::new(source, target);
        let fee = self
            .cache
            .read()
            .get_trading_fee_ppm_by_pair(source, target)
            .ok_or(MarketError::FeeUnknown(pair))?;
        let actions = self.get_match_actions(source, target, amount, by, &default_filter)?;

        let matched = actions.iter().fold(0u128, |total, a| total.saturating_add(a.input));
        let counter = actions.iter().fold(0u128, |total, a| total.saturating_add(a.output));
        let (source_amount, target_amount) = match by {
            TradeBy::Source => (matched, subtract_fee(counter, fee)),
            TradeBy::Target => (add_fee(counter, fee), matched),
        };

        Ok(TradeQuote {
            actions,
            source_amount,
            target_amount,
            trading_fee_ppm: fee,
            fully_matched: matched == amount,
        })
    }

    fn orders(&self, source: Address, target: Address) -> Result<OrdersMap, MarketError> {
        self.cache
            .read()
            .get_orders_by_pair(source, target)
            .ok_or_else(|| MarketError::PairNotCached(TokenPair::new(source, target)))
    }
}
