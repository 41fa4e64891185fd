/// Infrastructure Layer - Ledger Access
///
/// The domain layer never talks to the ledger; the sync driver reaches it
/// through the [`Fetcher`](fetcher::Fetcher) trait defined here.

pub mod fetcher;

pub use fetcher::{FetchError, Fetcher};
