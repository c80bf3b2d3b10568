//! SQLite battle store.
//!
//! One row per battle. The public snapshot and the working state are stored
//! as JSON columns; `task_id` and `created_at` are broken out for listing.

use arena_core::battle::{Battle, BattleRecord, WorkingState};
use arena_core::error::StoreError;
use arena_core::store::BattleStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed `BattleStore`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database gets its own empty one,
        // so keep exactly one and never recycle it
        let in_memory = path.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite battle store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS battles (
                id          TEXT PRIMARY KEY NOT NULL,
                task_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                snapshot    TEXT NOT NULL,
                working     TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("battles table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_battles_created_at ON battles(created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("created_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_battle(row: &sqlx::sqlite::SqliteRow) -> Result<(String, Battle), StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let snapshot: String = row
            .try_get("snapshot")
            .map_err(|e| StoreError::QueryFailed(format!("snapshot column: {e}")))?;

        let battle = serde_json::from_str(&snapshot).map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("snapshot: {e}"),
        })?;
        Ok((id, battle))
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<BattleRecord, StoreError> {
        let (id, battle) = Self::row_to_battle(row)?;
        let working_json: String = row
            .try_get("working")
            .map_err(|e| StoreError::QueryFailed(format!("working column: {e}")))?;

        let working: WorkingState =
            serde_json::from_str(&working_json).map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("working state: {e}"),
            })?;

        Ok(BattleRecord { battle, working })
    }
}

#[async_trait]
impl BattleStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, record: &BattleRecord) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&record.battle)
            .map_err(|e| StoreError::Storage(format!("encode snapshot: {e}")))?;
        let working = serde_json::to_string(&record.working)
            .map_err(|e| StoreError::Storage(format!("encode working state: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO battles (id, task_id, created_at, snapshot, working)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                task_id = excluded.task_id,
                created_at = excluded.created_at,
                snapshot = excluded.snapshot,
                working = excluded.working
            "#,
        )
        .bind(&record.battle.id)
        .bind(&record.battle.task_id)
        .bind(&record.battle.created_at)
        .bind(&snapshot)
        .bind(&working)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("save battle: {e}")))?;

        debug!(battle_id = %record.battle.id, "Battle saved");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<BattleRecord>, StoreError> {
        let row = sqlx::query("SELECT id, snapshot, working FROM battles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get battle: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Battle>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, snapshot FROM battles ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("list battles: {e}")))?;

        rows.iter()
            .map(|row| Self::row_to_battle(row).map(|(_, battle)| battle))
            .collect()
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM battles")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("count battles: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::QueryFailed(format!("count column: {e}")))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::battle::{AgentType, HistoryEntry, IterationStatus};

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn save_and_get_roundtrips_working_state() {
        let store = test_store().await;
        let mut record = BattleRecord::new(Battle::new("rest-api"));
        record.battle.start();
        record.working.traditional_history.push(HistoryEntry {
            response: "```js\nconst app = express();\n```".into(),
            status: IterationStatus::Partial,
        });
        record.working.ralph_state_file = "Iteration 1 completed.\nStatus: partial".into();
        store.save(&record).await.unwrap();

        let loaded = store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_database_is_shared_by_concurrent_callers() {
        let store = std::sync::Arc::new(test_store().await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let record = BattleRecord::new(Battle::new("unit-tests"));
                    store.save(&record).await.unwrap();
                    store.get(record.id()).await.unwrap().is_some()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = test_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = test_store().await;
        let mut record = BattleRecord::new(Battle::new("todo-component"));
        store.save(&record).await.unwrap();

        record.battle.winner = Some(AgentType::Ralph);
        store.save(&record).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let loaded = store.get(record.id()).await.unwrap().unwrap();
        assert_eq!(loaded.battle.winner, Some(AgentType::Ralph));
    }

    #[tokio::test]
    async fn list_recent_newest_first() {
        let store = test_store().await;
        let mut ids = Vec::new();
        for day in 1..=4 {
            let mut battle = Battle::new("data-processor");
            battle.created_at = format!("2026-03-0{day}T12:00:00+00:00");
            ids.push(battle.id.clone());
            store.save(&BattleRecord::new(battle)).await.unwrap();
        }

        let recent = store.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[3]);
        assert_eq!(recent[1].id, ids[2]);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO battles (id, task_id, created_at, snapshot) VALUES ('bad', 't', 'x', '{')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "bad"));
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.db");
        let path = path.to_str().unwrap();

        let record = BattleRecord::new(Battle::new("auth-middleware"));
        {
            let store = SqliteStore::new(path).await.unwrap();
            store.save(&record).await.unwrap();
        }

        let reopened = SqliteStore::new(path).await.unwrap();
        let loaded = reopened.get(record.id()).await.unwrap().unwrap();
        assert_eq!(loaded.battle.task_id, "auth-middleware");
    }
}
