/// Application Layer - Services
///
/// Orchestrates the domain layer against the ledger. Services depend on the
/// [`Fetcher`](crate::infrastructure::fetcher::Fetcher) trait rather than a
/// concrete client, so tests drive them with in-memory fetchers.
///
/// ## Modules
/// - `services`: ChainSyncer (cache synchronization), MatchingService (market queries)

pub mod services;

// Re-export key services
pub use services::{ChainSyncer, MatchingService};
