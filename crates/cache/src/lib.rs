//! Persisted per-campaign spend totals: the source the ledger is rebuilt
//! from after a restart.

#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;
pub mod store;

pub use client::RedisSpendStore;
pub use local::LocalSpendStore;
pub use store::SpendStore;
