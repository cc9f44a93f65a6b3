// In-memory implementation of TitleStore.
//
// Used by unit tests and by the engine-substitutability checks; it must stay
// observably identical to the SQL engines for every operation.

use crate::core::titles::{
    OwnershipView, StoreError, TitleStore, TransactionEntry, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default, Clone)]
struct PlayerRecord {
    owned: HashMap<String, DateTime<Utc>>,
    active: Option<String>,
}

#[derive(Default)]
pub struct InMemoryTitleStore {
    players: DashMap<Uuid, PlayerRecord>,
    transactions: Mutex<Vec<TransactionEntry>>,
}

impl InMemoryTitleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TitleStore for InMemoryTitleStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_ownership(&self, player_id: Uuid) -> Result<OwnershipView, StoreError> {
        let record = self
            .players
            .get(&player_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        Ok(OwnershipView {
            owned: record.owned.keys().cloned().collect(),
            active: record.active,
        })
    }

    async fn record_purchase(
        &self,
        player_id: Uuid,
        title_key: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let mut record = self.players.entry(player_id).or_default();
        if record.owned.contains_key(title_key) {
            return Ok(WriteOutcome::AlreadyExists);
        }
        record.owned.insert(title_key.to_string(), Utc::now());
        Ok(WriteOutcome::Committed)
    }

    async fn revoke(&self, player_id: Uuid, title_key: &str) -> Result<WriteOutcome, StoreError> {
        let Some(mut record) = self.players.get_mut(&player_id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if record.owned.remove(title_key).is_none() {
            return Ok(WriteOutcome::NotFound);
        }
        if record.active.as_deref() == Some(title_key) {
            record.active = None;
        }
        Ok(WriteOutcome::Committed)
    }

    async fn set_active(
        &self,
        player_id: Uuid,
        title_key: Option<&str>,
    ) -> Result<WriteOutcome, StoreError> {
        match title_key {
            None => {
                if let Some(mut record) = self.players.get_mut(&player_id) {
                    record.active = None;
                }
                Ok(WriteOutcome::Committed)
            }
            Some(key) => {
                let Some(mut record) = self.players.get_mut(&player_id) else {
                    return Ok(WriteOutcome::InvalidSelection);
                };
                if !record.owned.contains_key(key) {
                    return Ok(WriteOutcome::InvalidSelection);
                }
                record.active = Some(key.to_string());
                Ok(WriteOutcome::Committed)
            }
        }
    }

    async fn log_transaction(&self, entry: TransactionEntry) -> Result<(), StoreError> {
        self.transactions.lock().unwrap().push(entry);
        Ok(())
    }

    async fn recent_transactions(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions
            .iter()
            .filter(|entry| entry.player_id == player_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_purchase_is_idempotent() {
        let store = InMemoryTitleStore::new();
        let player = Uuid::new_v4();

        assert_eq!(
            store.record_purchase(player, "vip").await.unwrap(),
            WriteOutcome::Committed
        );
        assert_eq!(
            store.record_purchase(player, "vip").await.unwrap(),
            WriteOutcome::AlreadyExists
        );

        let view = store.load_ownership(player).await.unwrap();
        assert_eq!(view.count(), 1);
    }

    #[tokio::test]
    async fn test_revoke_clears_matching_selection() {
        let store = InMemoryTitleStore::new();
        let player = Uuid::new_v4();

        store.record_purchase(player, "vip").await.unwrap();
        store.set_active(player, Some("vip")).await.unwrap();

        assert_eq!(
            store.revoke(player, "vip").await.unwrap(),
            WriteOutcome::Committed
        );
        let view = store.load_ownership(player).await.unwrap();
        assert_eq!(view.active, None);

        assert_eq!(
            store.revoke(player, "vip").await.unwrap(),
            WriteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_selecting_unowned_title_is_invalid() {
        let store = InMemoryTitleStore::new();
        let player = Uuid::new_v4();

        assert_eq!(
            store.set_active(player, Some("vip")).await.unwrap(),
            WriteOutcome::InvalidSelection
        );
        // Clearing is always fine, even with no record at all.
        assert_eq!(
            store.set_active(player, None).await.unwrap(),
            WriteOutcome::Committed
        );
    }
}
