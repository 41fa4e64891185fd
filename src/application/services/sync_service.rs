/// Sync Service - Order Cache Synchronization
///
/// Keeps a [`ChainCache`](crate::domain::cache::ChainCache) consistent with the
/// remote ledger.
///
/// ## Lifecycle
/// 1. **Bootstrap**: seed the watermark at the current head (no history
///    replay), record recent headers, list pairs and find the uncached ones
/// 2. **Concurrently**:
///    - event loop: poll the head, detect reorgs, replay new events
///    - fee sync for the uncached pairs
///    - pair backfill in batches, then slow polling for brand-new pairs
/// 3. **Reorg**: the cache is cleared and the driver starts over at 1
///
/// A pair snapshot fetched while events for that pair were being skipped is
/// stale: it is discarded and fetched again instead of being cached.
///
/// Transient fetch failures are logged and retried after
/// [`SyncConfig::retry_delay`]; they never stop the driver.
/// [`ChainSyncer::stop`] cancels the whole task tree.
///
/// ## Usage
/// ```rust,ignore
/// let cache = ChainCache::new().shared();
/// let syncer = ChainSyncer::new(Arc::new(client), cache.clone(), SyncConfig::default());
/// syncer.start();
/// // ...
/// syncer.stop().await;
/// ```

use crate::domain::cache::{AppliedEvents, SharedCache, RECENT_BLOCKS};
use crate::infrastructure::fetcher::{FetchError, Fetcher};
use crate::shared::metrics::METRICS;
use crate::shared::protocol::{PairStrategies, TokenPair};
use alloy_primitives::Address;
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sync driver configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between head polls in the event loop
    pub poll_interval: Duration,

    /// Delay between pair list polls once every known pair is cached
    pub slow_poll_interval: Duration,

    /// Backoff after a failed fetch
    pub retry_delay: Duration,

    /// Pairs requested per backfill call
    pub pairs_batch_size: usize,

    /// Maximum block span per event request
    pub events_chunk_size: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            slow_poll_interval: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
            pairs_batch_size: 100,
            events_chunk_size: 1000,
        }
    }
}

impl SyncConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_slow_poll_interval(mut self, interval: Duration) -> Self {
        self.slow_poll_interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_pairs_batch_size(mut self, size: usize) -> Self {
        self.pairs_batch_size = size.max(1);
        self
    }

    pub fn with_events_chunk_size(mut self, size: u64) -> Self {
        self.events_chunk_size = size.max(1);
        self
    }
}

/// Outcome of one event-loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStep {
    Idle,
    Applied,
    Reorg,
}

/// Marks pairs as being fetched; released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<TokenPair>>,
    pairs: Vec<TokenPair>,
}

impl<'a> InFlight<'a> {
    /// Claims every pair not already claimed elsewhere.
    fn claim(set: &'a Mutex<HashSet<TokenPair>>, pairs: Vec<TokenPair>) -> Self {
        let mut claimed = set.lock();
        let pairs = pairs.into_iter().filter(|pair| claimed.insert(*pair)).collect();
        Self { set, pairs }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut claimed = self.set.lock();
        for pair in &self.pairs {
            claimed.remove(pair);
        }
    }
}

pub struct ChainSyncer<F> {
    fetcher: Arc<F>,
    cache: SharedCache,
    config: SyncConfig,
    /// Pairs known to the ledger but not cached yet
    pending_pairs: Mutex<BTreeSet<TokenPair>>,
    /// Wakes the backfill loop out of slow polling
    new_pairs: Notify,
    in_flight: Mutex<HashSet<TokenPair>>,
    /// In-flight pairs whose events were skipped before their snapshot landed
    stale_pairs: Mutex<HashSet<TokenPair>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<F: Fetcher + 'static> ChainSyncer<F> {
    pub fn new(fetcher: Arc<F>, cache: SharedCache, config: SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            cache,
            config,
            pending_pairs: Mutex::new(BTreeSet::new()),
            new_pairs: Notify::new(),
            in_flight: Mutex::new(HashSet::new()),
            stale_pairs: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Spawns the driver. Calling it again, or after [`stop`](Self::stop), does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.cancel.is_cancelled() {
            warn!("sync driver already started or stopped");
            return;
        }

        let syncer = Arc::clone(self);
        let token = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("sync driver cancelled"),
                _ = syncer.run() => {}
            }
        }));
        info!("sync driver started");
    }

    /// Cancels every loop and waits for the driver task to finish.
    ///
    /// No cache mutation happens after this returns.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "sync driver task failed");
                }
            }
        }
        info!("sync driver stopped");
    }

    /// Loads a single pair on demand.
    ///
    /// Returns `Ok(true)` when this call added the pair, `Ok(false)` when it
    /// was already cached or another fetch for it is in flight.
    pub async fn sync_pair_data(&self, token0: Address, token1: Address) -> Result<bool, FetchError> {
        let pair = TokenPair::new(token0, token1);
        if self.is_cached(&pair) {
            return Ok(false);
        }
        let claim = self.claim(vec![pair]);
        if claim.pairs.is_empty() {
            debug!(%pair, "pair already loading");
            return Ok(false);
        }

        loop {
            let fetched = futures::future::try_join(
                self.fetcher.strategies_by_pair(pair),
                self.fetcher.pair_trading_fee_ppm(pair),
            )
            .await;
            let (strategies, fee) = match fetched {
                Ok(fetched) => fetched,
                Err(err) => {
                    drop(claim);
                    self.queue_pairs(vec![pair]);
                    return Err(err);
                }
            };

            self.cache.write().add_pair_fees([(pair, fee)]);
            let (added, stale) = self.add_fetched(vec![PairStrategies { pair, strategies }]);
            if stale.is_empty() {
                return Ok(added > 0);
            }
            debug!(%pair, "pair snapshot predates applied events, refetching");
        }
    }

    async fn run(&self) {
        loop {
            let uncached = self.bootstrap().await;

            // 事件循环只在检测到重组时返回，回填循环永不返回
            tokio::select! {
                _ = self.event_loop() => {}
                _ = self.populate_pairs(uncached) => {}
            }

            warn!("chain reorganization detected, resynchronizing");
            METRICS.reorgs_total.inc();
            self.cache.write().clear();
            self.pending_pairs.lock().clear();
            // 重组前发起的快照都不可信
            let loading: Vec<TokenPair> = self.in_flight.lock().iter().copied().collect();
            self.stale_pairs.lock().extend(loading);
            METRICS.cached_pairs.set(0.0);
        }
    }

    async fn bootstrap(&self) -> Vec<TokenPair> {
        loop {
            match self.try_bootstrap().await {
                Ok(uncached) => return uncached,
                Err(err) => {
                    warn!(error = %err, "bootstrap failed, retrying");
                    METRICS.sync_errors_total.with_label_values(&["bootstrap"]).inc();
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn try_bootstrap(&self) -> Result<Vec<TokenPair>, FetchError> {
        let watermark = self.cache.read().get_latest_block_number();
        let head = match watermark {
            Some(block) => block,
            None => {
                let head = self.fetcher.get_block_number().await?;
                // 从当前区块开始同步，不回放历史事件
                self.cache.write().apply_events(Vec::new(), head);
                info!(block = head, "seeded cache watermark");
                head
            }
        };
        METRICS.latest_synced_block.set(head as f64);
        self.refresh_latest_blocks(head).await?;

        let pairs = self.fetcher.pairs().await?;
        let total = pairs.len();
        let uncached = self.uncached(pairs);
        info!(block = head, pairs = total, uncached = uncached.len(), "bootstrap complete");
        Ok(uncached)
    }

    async fn event_loop(&self) {
        loop {
            match self.sync_events().await {
                Ok(EventStep::Reorg) => return,
                Ok(EventStep::Idle) | Ok(EventStep::Applied) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    warn!(error = %err, "event sync failed, retrying");
                    METRICS.sync_errors_total.with_label_values(&["events"]).inc();
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn sync_events(&self) -> Result<EventStep, FetchError> {
        let head = self.fetcher.get_block_number().await?;
        let watermark = self.cache.read().get_latest_block_number();
        let Some(latest) = watermark else {
            // 缓存被外部清空，重新引导
            return Ok(EventStep::Reorg);
        };
        if head == latest {
            return Ok(EventStep::Idle);
        }
        if self.detect_reorg(head).await {
            return Ok(EventStep::Reorg);
        }
        if head < latest {
            return Ok(EventStep::Idle);
        }

        let events = self
            .fetcher
            .get_events(latest + 1, head, self.config.events_chunk_size)
            .await?;
        for event in &events {
            METRICS.events_applied_total.with_label_values(&[event.data.kind()]).inc();
        }
        let count = events.len();
        let applied = {
            let mut cache = self.cache.write();
            let applied = cache.apply_events(events, head);
            // 持有写锁标记，保证与 add_fetched 串行
            self.mark_stale(&applied.unknown_pairs);
            applied
        };
        METRICS.latest_synced_block.set(head as f64);
        debug!(
            from = latest + 1,
            to = head,
            events = count,
            pairs = applied.affected_pairs.len(),
            "applied events"
        );

        if !applied.unknown_pairs.is_empty() {
            self.queue_pairs(applied.unknown_pairs.iter().copied().collect());
        }
        self.refresh_latest_blocks(head).await?;
        self.refresh_fees(&applied).await?;
        Ok(EventStep::Applied)
    }

    /// Compares cached headers against the ledger.
    ///
    /// A fetch failure, a hash mismatch, or a cached block above `head` all
    /// count as a reorg.
    async fn detect_reorg(&self, head: u64) -> bool {
        let cached = self.cache.read().latest_blocks();
        for block in cached {
            if block.number > head {
                warn!(cached = block.number, head, "cached block is ahead of the chain head");
                return true;
            }
            match self.fetcher.get_block(block.number).await {
                Ok(fresh) if fresh.hash == block.hash => {}
                Ok(fresh) => {
                    warn!(
                        number = block.number,
                        cached = %block.hash,
                        fetched = %fresh.hash,
                        "block hash mismatch"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(number = block.number, error = %err, "failed to refetch cached block");
                    return true;
                }
            }
        }
        false
    }

    async fn refresh_latest_blocks(&self, head: u64) -> Result<(), FetchError> {
        let first = head.saturating_sub(RECENT_BLOCKS as u64 - 1);
        let blocks = try_join_all((first..=head).map(|number| self.fetcher.get_block(number))).await?;
        self.cache.write().set_latest_blocks(blocks);
        Ok(())
    }

    /// Refetches fees touched by an event batch and fees of newly seen pairs.
    async fn refresh_fees(&self, applied: &AppliedEvents) -> Result<(), FetchError> {
        if applied.default_fee_changed {
            let fee = self.fetcher.trading_fee_ppm().await?;
            self.cache.write().set_default_trading_fee_ppm(fee);
        }
        let pairs: Vec<TokenPair> = applied
            .fee_changed_pairs
            .union(&applied.unknown_pairs)
            .copied()
            .collect();
        if !pairs.is_empty() {
            let fees = self.fetcher.pairs_trading_fee_ppm(&pairs).await?;
            self.cache.write().add_pair_fees(fees);
        }
        Ok(())
    }

    async fn populate_pairs(&self, uncached: Vec<TokenPair>) {
        self.queue_pairs(uncached.clone());
        tokio::join!(self.sync_fees(&uncached), self.backfill_pairs());
    }

    async fn sync_fees(&self, pairs: &[TokenPair]) {
        loop {
            match self.try_sync_fees(pairs).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(error = %err, "fee sync failed, retrying");
                    METRICS.sync_errors_total.with_label_values(&["fees"]).inc();
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn try_sync_fees(&self, pairs: &[TokenPair]) -> Result<(), FetchError> {
        let default_fee = self.fetcher.trading_fee_ppm().await?;
        let fees = if pairs.is_empty() {
            Vec::new()
        } else {
            self.fetcher.pairs_trading_fee_ppm(pairs).await?
        };
        let mut cache = self.cache.write();
        cache.set_default_trading_fee_ppm(default_fee);
        cache.add_pair_fees(fees);
        Ok(())
    }

    async fn backfill_pairs(&self) {
        loop {
            let batch = self.next_pair_batch();
            if batch.is_empty() {
                // 慢轮询，事件循环发现新交易对时立即唤醒
                tokio::select! {
                    _ = tokio::time::sleep(self.config.slow_poll_interval) => {}
                    _ = self.new_pairs.notified() => {}
                }
                if let Err(err) = self.discover_pairs().await {
                    warn!(error = %err, "pair discovery failed, retrying");
                    METRICS.sync_errors_total.with_label_values(&["pairs"]).inc();
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                continue;
            }

            match self.load_pairs(&batch).await {
                Ok(loaded) => {
                    let remaining = self.pending_pairs.lock().len();
                    info!(loaded, remaining, "backfilled pairs");
                }
                Err(err) => {
                    warn!(error = %err, pairs = batch.len(), "pair backfill failed, retrying");
                    METRICS.sync_errors_total.with_label_values(&["pairs"]).inc();
                    self.queue_pairs(batch);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn discover_pairs(&self) -> Result<(), FetchError> {
        let pairs = self.fetcher.pairs().await?;
        let queued = self.queue_pairs(pairs);
        if !queued.is_empty() {
            info!(pairs = queued.len(), "discovered new pairs");
            let fees = self.fetcher.pairs_trading_fee_ppm(&queued).await?;
            self.cache.write().add_pair_fees(fees);
        }
        Ok(())
    }

    async fn load_pairs(&self, batch: &[TokenPair]) -> Result<usize, FetchError> {
        let claim = self.claim(self.uncached(batch.to_vec()));
        if claim.pairs.is_empty() {
            return Ok(0);
        }
        let fetched = self.fetcher.strategies_by_pairs(&claim.pairs).await?;
        let (added, stale) = self.add_fetched(fetched);
        drop(claim);

        if !stale.is_empty() {
            debug!(pairs = stale.len(), "pair snapshots predate applied events, refetching");
            self.queue_pairs(stale);
        }
        Ok(added)
    }

    /// Claims pairs for fetching. A fresh claim supersedes earlier stale marks.
    fn claim(&self, pairs: Vec<TokenPair>) -> InFlight<'_> {
        let claim = InFlight::claim(&self.in_flight, pairs);
        let mut stale = self.stale_pairs.lock();
        for pair in &claim.pairs {
            stale.remove(pair);
        }
        claim
    }

    /// Marks skipped pairs whose snapshot is currently being fetched.
    ///
    /// Called with the cache write lock held.
    fn mark_stale(&self, skipped: &BTreeSet<TokenPair>) {
        if skipped.is_empty() {
            return;
        }
        let loading = self.in_flight.lock();
        let mut stale = self.stale_pairs.lock();
        for pair in skipped.iter().filter(|pair| loading.contains(pair)) {
            stale.insert(*pair);
        }
    }

    /// Adds fetched pairs that are still uncached once the write lock is held.
    ///
    /// Returns the number added and the stale pairs that were discarded.
    fn add_fetched(&self, fetched: Vec<PairStrategies>) -> (usize, Vec<TokenPair>) {
        let mut cache = self.cache.write();
        let mut stale = self.stale_pairs.lock();
        let mut added = 0;
        let mut discarded = Vec::new();
        for entry in fetched {
            if stale.remove(&entry.pair) {
                discarded.push(entry.pair);
                continue;
            }
            if cache.add_pair(entry.pair, entry.strategies) {
                added += 1;
            }
        }
        METRICS.cached_pairs.set(cache.cached_pair_count() as f64);
        (added, discarded)
    }

    /// Queues uncached pairs for backfill and returns the newly queued ones.
    fn queue_pairs(&self, pairs: Vec<TokenPair>) -> Vec<TokenPair> {
        let uncached = self.uncached(pairs);
        let queued: Vec<TokenPair> = {
            let mut pending = self.pending_pairs.lock();
            uncached.into_iter().filter(|pair| pending.insert(*pair)).collect()
        };
        if !queued.is_empty() {
            self.new_pairs.notify_one();
        }
        queued
    }

    fn next_pair_batch(&self) -> Vec<TokenPair> {
        let mut pending = self.pending_pairs.lock();
        (0..self.config.pairs_batch_size.max(1))
            .map_while(|_| pending.pop_first())
            .collect()
    }

    fn uncached(&self, pairs: Vec<TokenPair>) -> Vec<TokenPair> {
        let cache = self.cache.read();
        pairs
            .into_iter()
            .filter(|pair| !cache.has_cached_pair(pair.token0, pair.token1))
            .collect()
    }

    fn is_cached(&self, pair: &TokenPair) -> bool {
        self.cache.read().has_cached_pair(pair.token0, pair.token1)
    }
}
