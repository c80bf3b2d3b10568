//! Battle storage backends for Ralph Arena.
//!
//! Both backends implement `arena_core::BattleStore` with upsert-by-id,
//! fetch-by-id and newest-first listing.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
