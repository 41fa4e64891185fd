/// Application Services
///
/// - `sync_service`: keeps the order cache consistent with the ledger
/// - `matching_service`: liquidity, rate and quote queries over the cache

pub mod matching_service;
pub mod sync_service;

pub use matching_service::{MarketError, MatchingService, TradeQuote};
pub use sync_service::{ChainSyncer, SyncConfig};
