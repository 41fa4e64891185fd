//! Curve Engine
//!
//! Off-chain engine for concentrated-liquidity curve orders: compresses
//! human-readable orders into the on-chain integer format, computes trades
//! against single orders, splits a trade across many orders, and keeps an
//! in-memory order cache in sync with the ledger.
//!
//! ## Layers
//! - `shared`: wire types, wide-integer helpers, metrics
//! - `domain`: codec, trade math, matching, order cache
//! - `infrastructure`: the ledger read interface
//! - `application`: sync driver and market queries over the cache
//! - `interfaces`: command-line entry point

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod shared;
