//! Backing stores for the ledger.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryStore, MemoryUnitOfWork};
#[cfg(feature = "postgres")]
pub use postgres::{PgStore, PgUnitOfWork};
