//! In-memory store: useful for testing and throwaway sessions.

use arena_core::battle::{Battle, BattleRecord};
use arena_core::error::StoreError;
use arena_core::store::BattleStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    records: HashMap<String, (u64, BattleRecord)>,
    next_seq: u64,
}

/// Stores battle records in a map. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BattleStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, record: &BattleRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let seq = match inner.records.get(record.id()) {
            Some((seq, _)) => *seq,
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        inner
            .records
            .insert(record.id().to_string(), (seq, record.clone()));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<BattleRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(id).map(|(_, record)| record.clone()))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Battle>, StoreError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&(u64, BattleRecord)> = inner.records.values().collect();
        // Insertion order breaks created_at ties
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.battle
                .created_at
                .cmp(&a.battle.created_at)
                .then(seq_b.cmp(seq_a))
        });
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.battle.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.records.len())
    }
}
