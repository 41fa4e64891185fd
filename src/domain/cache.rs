//! Order Cache
//!
//! In-memory mirror of every resting strategy, indexed by token pair, plus
//! the market data needed to quote trades (fees, latest trades) and the
//! recent block headers used for reorg detection.
//!
//! The cache performs no I/O. It is populated with [`ChainCache::add_pair`]
//! and mutated by replaying ledger events through [`ChainCache::apply_events`].
//! Observers subscribe to [`CacheEvent`] notifications.

use crate::shared::protocol::{
    BlockMetadata, EncodedStrategy, EventData, OrdersMap, PairStrategies, StrategyId, SyncEvent,
    TokenPair, TradeRecord,
};
use alloy_primitives::Address;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Number of recent block headers kept for reorg detection.
pub const RECENT_BLOCKS: usize = 3;

const NOTIFICATION_CAPACITY: usize = 1024;

/// Cache handle shared between the sync driver and readers.
pub type SharedCache = Arc<RwLock<ChainCache>>;

/// Change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    PairAdded(TokenPair),
    PairDataChanged(TokenPair),
    CacheCleared,
}

/// Summary of one [`ChainCache::apply_events`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedEvents {
    /// Events processed, including ones skipped for uncached pairs
    pub processed: usize,
    /// Cached pairs whose strategies or fee changed
    pub affected_pairs: BTreeSet<TokenPair>,
    /// Pairs referenced by strategy events that are not cached yet
    pub unknown_pairs: BTreeSet<TokenPair>,
    pub default_fee_changed: bool,
    pub fee_changed_pairs: BTreeSet<TokenPair>,
}

#[derive(Debug)]
pub struct ChainCache {
    strategies_by_pair: HashMap<TokenPair, BTreeMap<StrategyId, EncodedStrategy>>,
    pair_by_strategy: HashMap<StrategyId, TokenPair>,
    trading_fee_ppm_by_pair: HashMap<TokenPair, u32>,
    default_trading_fee_ppm: Option<u32>,
    latest_trades: HashMap<TokenPair, TradeRecord>,
    latest_blocks: VecDeque<BlockMetadata>,
    /// Watermark: events up to and including this block have been applied
    latest_block_number: Option<u64>,
    notifier: broadcast::Sender<CacheEvent>,
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainCache {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            strategies_by_pair: HashMap::new(),
            pair_by_strategy: HashMap::new(),
            trading_fee_ppm_by_pair: HashMap::new(),
            default_trading_fee_ppm: None,
            latest_trades: HashMap::new(),
            latest_blocks: VecDeque::with_capacity(RECENT_BLOCKS),
            latest_block_number: None,
            notifier,
        }
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(RwLock::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.notifier.subscribe()
    }

    fn notify(&self, event: CacheEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.notifier.send(event);
    }

    /// Stores a pair's full strategy list.
    ///
    /// Returns `false` and leaves the existing entry untouched when the pair
    /// is already cached.
    pub fn add_pair(&mut self, pair: TokenPair, strategies: Vec<EncodedStrategy>) -> bool {
        if self.strategies_by_pair.contains_key(&pair) {
            return false;
        }

        let mut by_id = BTreeMap::new();
        for strategy in strategies {
            if strategy.pair() != pair {
                continue;
            }
            self.pair_by_strategy.insert(strategy.id, pair);
            by_id.insert(strategy.id, strategy);
        }
        self.strategies_by_pair.insert(pair, by_id);
        self.notify(CacheEvent::PairAdded(pair));
        true
    }

    pub fn bulk_add_pairs(&mut self, pairs: Vec<PairStrategies>) -> usize {
        let mut added = 0;
        for entry in pairs {
            if self.add_pair(entry.pair, entry.strategies) {
                added += 1;
            }
        }
        added
    }

    pub fn has_cached_pair(&self, token0: Address, token1: Address) -> bool {
        self.strategies_by_pair.contains_key(&TokenPair::new(token0, token1))
    }

    pub fn get_cached_pairs(&self) -> Vec<TokenPair> {
        let mut pairs: Vec<TokenPair> = self.strategies_by_pair.keys().copied().collect();
        pairs.sort();
        pairs
    }

    pub fn cached_pair_count(&self) -> usize {
        self.strategies_by_pair.len()
    }

    /// Strategies of a pair, or `None` when the pair is not cached.
    pub fn get_strategies_by_pair(&self, token0: Address, token1: Address) -> Option<Vec<EncodedStrategy>> {
        self.strategies_by_pair
            .get(&TokenPair::new(token0, token1))
            .map(|by_id| by_id.values().cloned().collect())
    }

    pub fn get_strategy_by_id(&self, id: StrategyId) -> Option<EncodedStrategy> {
        let pair = self.pair_by_strategy.get(&id)?;
        self.strategies_by_pair.get(pair)?.get(&id).cloned()
    }

    /// Orders that sell `target` for `source`, keyed by strategy id.
    pub fn get_orders_by_pair(&self, source: Address, target: Address) -> Option<OrdersMap> {
        let by_id = self.strategies_by_pair.get(&TokenPair::new(source, target))?;
        Some(
            by_id
                .iter()
                .filter_map(|(id, strategy)| strategy.order_selling(target).map(|order| (*id, *order)))
                .collect(),
        )
    }

    pub fn add_pair_fees(&mut self, fees: impl IntoIterator<Item = (TokenPair, u32)>) {
        for (pair, fee) in fees {
            self.trading_fee_ppm_by_pair.insert(pair, fee);
        }
    }

    pub fn set_default_trading_fee_ppm(&mut self, fee: u32) {
        self.default_trading_fee_ppm = Some(fee);
    }

    pub fn default_trading_fee_ppm(&self) -> Option<u32> {
        self.default_trading_fee_ppm
    }

    /// Pair-specific fee, falling back to the default fee.
    pub fn get_trading_fee_ppm_by_pair(&self, token0: Address, token1: Address) -> Option<u32> {
        self.trading_fee_ppm_by_pair
            .get(&TokenPair::new(token0, token1))
            .copied()
            .or(self.default_trading_fee_ppm)
    }

    pub fn get_latest_trade_by_pair(&self, token0: Address, token1: Address) -> Option<&TradeRecord> {
        self.latest_trades.get(&TokenPair::new(token0, token1))
    }

    /// Replaces the recent header ring, keeping the highest [`RECENT_BLOCKS`] entries.
    pub fn set_latest_blocks(&mut self, mut blocks: Vec<BlockMetadata>) {
        blocks.sort_by_key(|block| block.number);
        blocks.dedup_by_key(|block| block.number);
        let skip = blocks.len().saturating_sub(RECENT_BLOCKS);
        self.latest_blocks = blocks.into_iter().skip(skip).collect();
    }

    pub fn latest_blocks(&self) -> Vec<BlockMetadata> {
        self.latest_blocks.iter().copied().collect()
    }

    pub fn get_latest_block_number(&self) -> Option<u64> {
        self.latest_block_number
    }

    /// Replays events in `(block_number, log_index)` order and advances the
    /// watermark to `new_block_number`.
    ///
    /// Strategy events for pairs that are not cached are skipped and reported
    /// in [`AppliedEvents::unknown_pairs`]. Replaying an event twice leaves
    /// the cache unchanged.
    pub fn apply_events(&mut self, mut events: Vec<SyncEvent>, new_block_number: u64) -> AppliedEvents {
        events.sort_by_key(SyncEvent::sort_key);
        let mut applied = AppliedEvents { processed: events.len(), ..Default::default() };

        for event in events {
            match event.data {
                EventData::StrategyCreated(strategy) | EventData::StrategyUpdated(strategy) => {
                    let pair = strategy.pair();
                    match self.strategies_by_pair.get_mut(&pair) {
                        Some(by_id) => {
                            self.pair_by_strategy.insert(strategy.id, pair);
                            by_id.insert(strategy.id, strategy);
                            applied.affected_pairs.insert(pair);
                        }
                        None => {
                            applied.unknown_pairs.insert(pair);
                        }
                    }
                }
                EventData::StrategyDeleted(strategy) => {
                    let pair = strategy.pair();
                    match self.strategies_by_pair.get_mut(&pair) {
                        Some(by_id) => {
                            by_id.remove(&strategy.id);
                            self.pair_by_strategy.remove(&strategy.id);
                            applied.affected_pairs.insert(pair);
                        }
                        None => {
                            applied.unknown_pairs.insert(pair);
                        }
                    }
                }
                EventData::TradingFeePpmUpdated { new_fee_ppm } => {
                    self.default_trading_fee_ppm = Some(new_fee_ppm);
                    applied.default_fee_changed = true;
                }
                EventData::PairTradingFeePpmUpdated { pair, new_fee_ppm } => {
                    self.trading_fee_ppm_by_pair.insert(pair, new_fee_ppm);
                    applied.fee_changed_pairs.insert(pair);
                    if self.strategies_by_pair.contains_key(&pair) {
                        applied.affected_pairs.insert(pair);
                    }
                }
                EventData::TokensTraded(trade) => {
                    self.latest_trades.insert(trade.pair(), trade);
                }
            }
        }

        // 水位线只前进不后退
        self.latest_block_number = Some(match self.latest_block_number {
            Some(current) => current.max(new_block_number),
            None => new_block_number,
        });

        for pair in &applied.affected_pairs {
            self.notify(CacheEvent::PairDataChanged(*pair));
        }
        applied
    }

    /// Drops all state, including the watermark.
    pub fn clear(&mut self) {
        self.strategies_by_pair.clear();
        self.pair_by_strategy.clear();
        self.trading_fee_ppm_by_pair.clear();
        self.default_trading_fee_ppm = None;
        self.latest_trades.clear();
        self.latest_blocks.clear();
        self.latest_block_number = None;
        self.notify(CacheEvent::CacheCleared);
    }
}
