// SQLite implementation of the TitleStore trait - the embedded engine.
//
// The default backend: a single database file next to the host's other data,
// no external service required.

use crate::core::titles::{
    OwnershipView, StoreError, TitleStore, TransactionAction, TransactionEntry, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::config::PoolSettings;

use super::store_err;

pub struct SqliteTitleStore {
    pool: SqlitePool,
}

impl SqliteTitleStore {
    /// Opens (creating if missing) the database file and prepares the schema.
    pub async fn new(database_path: &str, pool: &PoolSettings) -> anyhow::Result<Self> {
        let connection_string = format!("sqlite://{}?mode=rwc", database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(pool.acquire_timeout())
            .connect(&connection_string)
            .await?;

        Self::with_pool(pool).await
    }

    /// Wraps an existing pool. Lets tests run against `sqlite::memory:`.
    pub async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }
}

#[async_trait]
impl TitleStore for SqliteTitleStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ownership (
                player_id TEXT NOT NULL,
                title_key TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                PRIMARY KEY (player_id, title_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS active_selection (
                player_id TEXT PRIMARY KEY,
                title_key TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS title_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id TEXT NOT NULL,
                title_key TEXT NOT NULL,
                action TEXT NOT NULL,
                amount INTEGER,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_title_tx_player
            ON title_transactions(player_id, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn load_ownership(&self, player_id: Uuid) -> Result<OwnershipView, StoreError> {
        let rows = sqlx::query("SELECT title_key FROM ownership WHERE player_id = ?")
            .bind(player_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let owned: HashSet<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("title_key"))
            .collect();

        let active_row = sqlx::query("SELECT title_key FROM active_selection WHERE player_id = ?")
            .bind(player_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        // A dangling selection (crash between writes) reads as no selection.
        let active = active_row
            .and_then(|row| row.get::<Option<String>, _>("title_key"))
            .filter(|key| owned.contains(key));

        Ok(OwnershipView { owned, active })
    }

    async fn record_purchase(
        &self,
        player_id: Uuid,
        title_key: &str,
    ) -> Result<WriteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO ownership (player_id, title_key, acquired_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(player_id.to_string())
        .bind(title_key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            Ok(WriteOutcome::AlreadyExists)
        } else {
            Ok(WriteOutcome::Committed)
        }
    }

    async fn revoke(&self, player_id: Uuid, title_key: &str) -> Result<WriteOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let deleted = sqlx::query("DELETE FROM ownership WHERE player_id = ? AND title_key = ?")
            .bind(player_id.to_string())
            .bind(title_key)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await.map_err(store_err)?;
            return Ok(WriteOutcome::NotFound);
        }

        // Same transaction: no observable state where the selection points
        // at a title the player no longer owns.
        sqlx::query("DELETE FROM active_selection WHERE player_id = ? AND title_key = ?")
            .bind(player_id.to_string())
            .bind(title_key)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(WriteOutcome::Committed)
    }

    async fn set_active(
        &self,
        player_id: Uuid,
        title_key: Option<&str>,
    ) -> Result<WriteOutcome, StoreError> {
        let Some(key) = title_key else {
            sqlx::query("DELETE FROM active_selection WHERE player_id = ?")
                .bind(player_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
            return Ok(WriteOutcome::Committed);
        };

        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let owned = sqlx::query("SELECT 1 FROM ownership WHERE player_id = ? AND title_key = ?")
            .bind(player_id.to_string())
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?;

        if owned.is_none() {
            tx.rollback().await.map_err(store_err)?;
            return Ok(WriteOutcome::InvalidSelection);
        }

        sqlx::query(
            r#"
            INSERT INTO active_selection (player_id, title_key)
            VALUES (?, ?)
            ON CONFLICT(player_id) DO UPDATE SET title_key = excluded.title_key
            "#,
        )
        .bind(player_id.to_string())
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(WriteOutcome::Committed)
    }

    async fn log_transaction(&self, entry: TransactionEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO title_transactions (player_id, title_key, action, amount, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.player_id.to_string())
        .bind(entry.title_key)
        .bind(entry.action.as_str())
        .bind(entry.amount)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn recent_transactions(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT player_id, title_key, action, amount, timestamp
            FROM title_transactions
            WHERE player_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(player_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let entries = rows
            .iter()
            .filter_map(|row| {
                let player_id = Uuid::parse_str(&row.get::<String, _>("player_id")).ok()?;
                let action = TransactionAction::from_str(&row.get::<String, _>("action"))?;
                let timestamp = DateTime::parse_from_rfc3339(&row.get::<String, _>("timestamp"))
                    .ok()?
                    .with_timezone(&Utc);

                Some(TransactionEntry {
                    player_id,
                    title_key: row.get::<String, _>("title_key"),
                    action,
                    amount: row.get::<Option<i64>, _>("amount"),
                    timestamp,
                })
            })
            .collect();

        Ok(entries)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
