/// Domain Layer - Core Business Logic
///
/// Pure computation over orders and the cache state. Nothing in this layer
/// performs I/O; the cache only emits in-process notifications.
///
/// ## Modules
/// - `codec`: decimal order <-> compressed on-chain order
/// - `strategy`: human prices and budgets <-> decoded strategy
/// - `trade_math`: trade amounts against a single order, fees
/// - `matching`: splitting a trade across many orders
/// - `cache`: in-memory order cache and event replay
/// - `validation`: rate ordering rules

pub mod cache;
pub mod codec;
pub mod matching;
pub mod strategy;
pub mod trade_math;
pub mod validation;

// Re-export key types
pub use cache::{ChainCache, SharedCache};
pub use matching::{MatchConfig, MatchPolicy, MatchType, MatchingEngine, TradeBy};
pub use trade_math::{TradeFormula, TradeMath};
