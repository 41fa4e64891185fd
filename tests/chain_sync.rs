use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use curve_engine::application::services::{ChainSyncer, SyncConfig};
use curve_engine::domain::cache::{CacheEvent, ChainCache, SharedCache};
use curve_engine::infrastructure::fetcher::{FetchError, Fetcher};
use curve_engine::shared::protocol::{
    BlockMetadata, EncodedOrder, EncodedStrategy, EventData, SyncEvent, TokenPair,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// 内存中的账本，测试可随时修改链头、事件与分叉
#[derive(Default)]
struct LedgerState {
    head: u64,
    /// 改变后所有区块哈希随之改变，模拟重组
    fork: u8,
    pairs: Vec<TokenPair>,
    strategies: HashMap<TokenPair, Vec<EncodedStrategy>>,
    events: Vec<SyncEvent>,
    default_fee: u32,
    pair_fees: HashMap<TokenPair, u32>,
    /// 接下来若干次 pairs() 调用返回错误
    failing_pairs_calls: usize,
    strategy_requests: usize,
    /// 策略快照取得后，返回前的延迟
    strategies_delay: Duration,
    /// 这些区块的 get_block 返回错误
    missing_blocks: HashSet<u64>,
}

#[derive(Default)]
struct MockFetcher {
    state: Mutex<LedgerState>,
}

impl MockFetcher {
    fn hash(number: u64, fork: u8) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[0] = fork;
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn pairs(&self) -> Result<Vec<TokenPair>, FetchError> {
        let mut state = self.state.lock();
        if state.failing_pairs_calls > 0 {
            state.failing_pairs_calls -= 1;
            return Err(FetchError::Request("connection reset".to_string()));
        }
        Ok(state.pairs.clone())
    }

    async fn strategies_by_pair(&self, pair: TokenPair) -> Result<Vec<EncodedStrategy>, FetchError> {
        let (strategies, delay) = {
            let mut state = self.state.lock();
            state.strategy_requests += 1;
            (state.strategies.get(&pair).cloned().unwrap_or_default(), state.strategies_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(strategies)
    }

    async fn pair_trading_fee_ppm(&self, pair: TokenPair) -> Result<u32, FetchError> {
        let state = self.state.lock();
        Ok(state.pair_fees.get(&pair).copied().unwrap_or(state.default_fee))
    }

    async fn trading_fee_ppm(&self) -> Result<u32, FetchError> {
        Ok(self.state.lock().default_fee)
    }

    async fn get_block_number(&self) -> Result<u64, FetchError> {
        Ok(self.state.lock().head)
    }

    async fn get_block(&self, number: u64) -> Result<BlockMetadata, FetchError> {
        let state = self.state.lock();
        if number > state.head || state.missing_blocks.contains(&number) {
            return Err(FetchError::BlockNotFound(number));
        }
        Ok(BlockMetadata { number, hash: Self::hash(number, state.fork) })
    }

    async fn get_events_in_range(&self, from_block: u64, to_block: u64) -> Result<Vec<SyncEvent>, FetchError> {
        let state = self.state.lock();
        Ok(state
            .events
            .iter()
            .filter(|event| event.block_number >= from_block && event.block_number <= to_block)
            .cloned()
            .collect())
    }
}

fn token(n: u8) -> Address {
    Address::repeat_byte(n)
}

fn strategy(id: u64, pair: TokenPair, y: u128) -> EncodedStrategy {
    EncodedStrategy {
        id: U256::from(id),
        token0: pair.token0,
        token1: pair.token1,
        order0: EncodedOrder { y, z: y, a: 0, b: 199_032_864_766_430 },
        order1: EncodedOrder { y, z: y, a: 0, b: 199_032_864_766_430 },
    }
}

fn ledger() -> Arc<MockFetcher> {
    let fetcher = MockFetcher::default();
    {
        let mut state = fetcher.state.lock();
        state.head = 100;
        state.default_fee = 2000;
        for (n, (a, b)) in [(1u8, 2u8), (3, 4)].into_iter().enumerate() {
            let pair = TokenPair::new(token(a), token(b));
            state.pairs.push(pair);
            state.strategies.insert(pair, vec![strategy(n as u64 + 1, pair, 1000)]);
        }
        state.pair_fees.insert(TokenPair::new(token(3), token(4)), 500);
    }
    Arc::new(fetcher)
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_slow_poll_interval(Duration::from_millis(50))
        .with_retry_delay(Duration::from_millis(10))
}

async fn wait_until(cache: &SharedCache, condition: impl Fn(&ChainCache) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition(&cache.read()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn expect_cache_cleared(notifications: &mut broadcast::Receiver<CacheEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match notifications.recv().await {
                Ok(CacheEvent::CacheCleared) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(err) => panic!("notification channel closed: {err}"),
            }
        }
    })
    .await
    .expect("cache was not cleared");
}

#[tokio::test]
async fn test_bootstrap_backfills_pairs_and_fees() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();

    wait_until(&cache, |c| c.cached_pair_count() == 2 && c.default_trading_fee_ppm().is_some()).await;
    wait_until(&cache, |c| c.get_trading_fee_ppm_by_pair(token(3), token(4)) == Some(500)).await;

    {
        let cache = cache.read();
        assert_eq!(cache.get_latest_block_number(), Some(100));
        let blocks = cache.latest_blocks();
        assert_eq!(blocks.iter().map(|b| b.number).collect::<Vec<_>>(), vec![98, 99, 100]);
        assert_eq!(cache.get_trading_fee_ppm_by_pair(token(1), token(2)), Some(2000));
        assert!(cache.get_strategy_by_id(U256::from(2u8)).is_some());
    }

    syncer.stop().await;
}

#[tokio::test]
async fn test_new_events_are_replayed() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    let pair = TokenPair::new(token(1), token(2));
    {
        let mut state = fetcher.state.lock();
        state.events = vec![
            SyncEvent { block_number: 101, log_index: 1, data: EventData::StrategyUpdated(strategy(1, pair, 400)) },
            SyncEvent { block_number: 101, log_index: 0, data: EventData::StrategyUpdated(strategy(1, pair, 700)) },
            SyncEvent { block_number: 102, log_index: 0, data: EventData::StrategyCreated(strategy(9, pair, 50)) },
        ];
        state.head = 102;
    }

    wait_until(&cache, |c| c.get_latest_block_number() == Some(102)).await;
    {
        let cache = cache.read();
        // 同一区块内按日志序号应用，最后一次更新生效
        assert_eq!(cache.get_strategy_by_id(U256::from(1u8)).unwrap().order0.y, 400);
        assert_eq!(cache.get_strategies_by_pair(token(1), token(2)).unwrap().len(), 2);
    }

    syncer.stop().await;
}

#[tokio::test]
async fn test_event_for_unknown_pair_triggers_backfill() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    let pair = TokenPair::new(token(5), token(6));
    {
        let mut state = fetcher.state.lock();
        let created = strategy(7, pair, 300);
        state.strategies.insert(pair, vec![created.clone()]);
        state.events = vec![SyncEvent { block_number: 101, log_index: 0, data: EventData::StrategyCreated(created) }];
        state.head = 101;
    }

    wait_until(&cache, |c| c.has_cached_pair(token(5), token(6))).await;
    assert_eq!(cache.read().get_strategy_by_id(U256::from(7u8)).unwrap().order1.y, 300);

    syncer.stop().await;
}

#[tokio::test]
async fn test_reorg_clears_and_resynchronizes() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    let mut notifications = cache.read().subscribe();
    {
        let mut state = fetcher.state.lock();
        state.fork = 1;
        state.head = 101;
    }

    expect_cache_cleared(&mut notifications).await;

    // 重新引导后，水位线为新链头，区块哈希来自新分叉
    wait_until(&cache, |c| c.cached_pair_count() == 2 && c.get_latest_block_number() == Some(101)).await;
    wait_until(&cache, |c| c.latest_blocks().len() == 3).await;
    let blocks = cache.read().latest_blocks();
    assert!(blocks.iter().all(|b| b.hash == MockFetcher::hash(b.number, 1)));

    syncer.stop().await;
}

#[tokio::test]
async fn test_reorg_when_cached_block_cannot_be_fetched() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    let mut notifications = cache.read().subscribe();
    {
        let mut state = fetcher.state.lock();
        state.missing_blocks.insert(99);
        state.head = 101;
    }
    expect_cache_cleared(&mut notifications).await;

    syncer.stop().await;
}

#[tokio::test]
async fn test_reorg_when_head_falls_below_watermark() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    let mut notifications = cache.read().subscribe();
    fetcher.state.lock().head = 98;
    expect_cache_cleared(&mut notifications).await;

    // 从更低的链头重新同步
    wait_until(&cache, |c| c.cached_pair_count() == 2 && c.get_latest_block_number() == Some(98)).await;

    syncer.stop().await;
}

#[tokio::test]
async fn test_snapshot_older_than_applied_events_is_refetched() {
    let fetcher = ledger();
    fetcher.state.lock().strategies_delay = Duration::from_millis(300);
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();

    // 等待回填取得 y=1000 的快照，此时仍在返回途中
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher.state.lock().strategy_requests < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("backfill did not start");

    let pair = TokenPair::new(token(1), token(2));
    {
        let mut state = fetcher.state.lock();
        let updated = strategy(1, pair, 5);
        state.strategies.insert(pair, vec![updated.clone()]);
        state.events = vec![SyncEvent { block_number: 101, log_index: 0, data: EventData::StrategyUpdated(updated) }];
        state.head = 101;
    }

    wait_until(&cache, |c| c.get_strategy_by_id(U256::from(1u8)).map(|s| s.order0.y) == Some(5)).await;
    {
        let cache = cache.read();
        assert_eq!(cache.get_latest_block_number(), Some(101));
        assert_eq!(cache.cached_pair_count(), 2);
    }
    assert!(fetcher.state.lock().strategy_requests >= 3);

    syncer.stop().await;
}

#[tokio::test]
async fn test_bootstrap_retries_after_fetch_failure() {
    let fetcher = ledger();
    fetcher.state.lock().failing_pairs_calls = 3;
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();

    wait_until(&cache, |c| c.cached_pair_count() == 2).await;
    assert_eq!(fetcher.state.lock().failing_pairs_calls, 0);

    syncer.stop().await;
}

#[tokio::test]
async fn test_stop_halts_cache_mutation() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());
    syncer.start();
    wait_until(&cache, |c| c.cached_pair_count() == 2).await;

    syncer.stop().await;
    fetcher.state.lock().head = 150;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.read().get_latest_block_number(), Some(100));

    // 停止后无法再次启动
    syncer.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.read().get_latest_block_number(), Some(100));
}

#[tokio::test]
async fn test_sync_pair_data_loads_once() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());

    assert_eq!(syncer.sync_pair_data(token(4), token(3)).await, Ok(true));
    assert_eq!(syncer.sync_pair_data(token(3), token(4)).await, Ok(false));
    assert_eq!(fetcher.state.lock().strategy_requests, 1);

    let cache = cache.read();
    assert!(cache.has_cached_pair(token(3), token(4)));
    assert_eq!(cache.get_trading_fee_ppm_by_pair(token(3), token(4)), Some(500));
}

#[tokio::test]
async fn test_concurrent_sync_pair_data_fetches_once() {
    let fetcher = ledger();
    let cache = ChainCache::new().shared();
    let syncer = ChainSyncer::new(fetcher.clone(), cache.clone(), fast_config());

    let (first, second) = tokio::join!(
        syncer.sync_pair_data(token(1), token(2)),
        syncer.sync_pair_data(token(2), token(1)),
    );
    assert_eq!(first, Ok(true));
    assert_eq!(second, Ok(false));
    assert_eq!(fetcher.state.lock().strategy_requests, 1);
}
