//! Account balance ledger. Balances and their append-only history change only inside atomic
//! units of work.

pub mod config;
pub mod dlq;
pub mod domain;
pub mod engine;
pub mod ingestion;
pub mod logging;
pub mod output;
pub mod store;

pub use config::Config;
pub use domain::{Error, Money, Result};
pub use engine::{Ledger, ReplaySummary};
pub use store::MemoryStore;
