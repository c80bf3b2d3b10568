//! BattleStore trait: durable storage for battle records.
//!
//! The store is the single source of truth. Writes replace the whole record
//! (no partial patches); listing returns only the public snapshots.

use async_trait::async_trait;

use crate::battle::{Battle, BattleRecord};
use crate::error::StoreError;

/// How many battles `GET /battles` returns.
pub const RECENT_BATTLES_LIMIT: usize = 50;

/// The core storage trait.
#[async_trait]
pub trait BattleStore: Send + Sync {
    /// The name of this backend (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Insert or fully replace a record, keyed by battle id.
    async fn save(&self, record: &BattleRecord) -> Result<(), StoreError>;

    /// Fetch a record by battle id.
    async fn get(&self, id: &str) -> Result<Option<BattleRecord>, StoreError>;

    /// The most recent battles, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Battle>, StoreError>;

    /// Number of stored battles.
    async fn count(&self) -> Result<usize, StoreError>;
}
