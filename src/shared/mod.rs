/// Shared utilities and types used across all layers
///
/// This module contains:
/// - Protocol definitions (orders, strategies, ledger events)
/// - Wide unsigned integer helpers
/// - Prometheus metrics

pub mod metrics;
pub mod protocol;
pub mod uint;

// Re-export commonly used types
pub use protocol::{
    BlockMetadata, DecodedOrder, DecodedStrategy, EncodedOrder, EncodedStrategy, EventData,
    MatchAction, OrdersMap, StrategyId, SyncEvent, TokenPair,
};
