//! Persistence adapters implementing `RateStorePort`.

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryRateStore;
pub use sqlite::SqliteRateStore;
