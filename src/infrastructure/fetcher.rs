//! Remote ledger read interface
//!
//! The sync driver only talks to the ledger through [`Fetcher`]. Batched and
//! chunked calls have default implementations built on the single-item calls,
//! so a minimal client only implements those.

use crate::shared::protocol::{BlockMetadata, EncodedStrategy, PairStrategies, SyncEvent, TokenPair};
use async_trait::async_trait;
use futures::future::try_join_all;

/// Ledger read failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// All token pairs with at least one strategy ever created.
    async fn pairs(&self) -> Result<Vec<TokenPair>, FetchError>;

    async fn strategies_by_pair(&self, pair: TokenPair) -> Result<Vec<EncodedStrategy>, FetchError>;

    async fn strategies_by_pairs(&self, pairs: &[TokenPair]) -> Result<Vec<PairStrategies>, FetchError> {
        let requests = pairs.iter().map(|pair| async move {
            let strategies = self.strategies_by_pair(*pair).await?;
            Ok::<_, FetchError>(PairStrategies { pair: *pair, strategies })
        });
        try_join_all(requests).await
    }

    async fn pair_trading_fee_ppm(&self, pair: TokenPair) -> Result<u32, FetchError>;

    async fn pairs_trading_fee_ppm(&self, pairs: &[TokenPair]) -> Result<Vec<(TokenPair, u32)>, FetchError> {
        let requests = pairs.iter().map(|pair| async move {
            let fee = self.pair_trading_fee_ppm(*pair).await?;
            Ok::<_, FetchError>((*pair, fee))
        });
        try_join_all(requests).await
    }

    /// Default trading fee, parts per million.
    async fn trading_fee_ppm(&self) -> Result<u32, FetchError>;

    async fn get_block_number(&self) -> Result<u64, FetchError>;

    async fn get_block(&self, number: u64) -> Result<BlockMetadata, FetchError>;

    /// Events in the inclusive block range `[from_block, to_block]`.
    async fn get_events_in_range(&self, from_block: u64, to_block: u64) -> Result<Vec<SyncEvent>, FetchError>;

    /// Events in `[from_block, to_block]`, requested concurrently in chunks of
    /// at most `max_chunk_size` blocks and sorted by `(block_number, log_index)`.
    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
        max_chunk_size: u64,
    ) -> Result<Vec<SyncEvent>, FetchError> {
        let ranges = chunk_range(from_block, to_block, max_chunk_size);
        let batches = try_join_all(
            ranges
                .into_iter()
                .map(|(start, end)| self.get_events_in_range(start, end)),
        )
        .await?;

        let mut events: Vec<SyncEvent> = batches.into_iter().flatten().collect();
        events.sort_by_key(SyncEvent::sort_key);
        Ok(events)
    }
}

/// Splits `[from, to]` into inclusive ranges of at most `chunk` blocks.
pub fn chunk_range(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}
